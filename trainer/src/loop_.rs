use collective::{Collective, broadcast};
use log::{debug, info, warn};

use crate::{
    Result, TrainErr,
    arch::{LossFn, Model},
    checkpoint::{Checkpoint, CheckpointStore},
    config::TrainConfig,
    data::{DataLoader, Dataset, DistributedSampler, Remainder, Subset},
    metrics::{EpochMetrics, Summary, avg_loss_key, format_record},
    optimization::Optimizer,
    replica::Replica,
    schedule::Schedule,
    stopping::{EarlyStopping, StopReason, Verdict},
    tracking::Tracker,
};

/// What every rank saw of one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: Summary,
    pub valid: Summary,
    pub verdict: Verdict,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub reason: StopReason,
    pub history: Vec<EpochReport>,
    /// The parameters of this rank's replica when the run ended.
    pub params: Vec<f32>,
}

impl Outcome {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}

/// Drives a rank through the epochs of a run.
///
/// Every rank runs the exact same sequence of collectives: the initial
/// parameter broadcast, one all-reduce per synchronized step, and per epoch a
/// barrier plus all-gather for each subset, the verdict broadcast and the two
/// barriers around the checkpoint write.
pub struct TrainingLoop<M, O, L, D> {
    cfg: TrainConfig,
    rank: usize,
    coordinator: usize,
    replica: Replica<M>,
    optimizer: O,
    loss: L,
    train_set: D,
    valid_set: D,
    schedule: Schedule,
    stopping: Option<EarlyStopping>,
    store: CheckpointStore,
    tracker: Box<dyn Tracker>,
    global_step: usize,
}

impl<M, O, L, D> TrainingLoop<M, O, L, D>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    D: Dataset + Send + Sync,
{
    /// Creates a new `TrainingLoop` for `rank`.
    ///
    /// # Errors
    /// `ResumeUnsupported` if the configuration asks to resume a run.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: TrainConfig,
        rank: usize,
        model: M,
        optimizer: O,
        loss: L,
        train_set: D,
        valid_set: D,
        tracker: Box<dyn Tracker>,
    ) -> Result<Self> {
        if cfg.resume {
            return Err(TrainErr::ResumeUnsupported);
        }

        let coordinator = cfg.coordinator_rank();
        let stopping = (rank == coordinator)
            .then(|| EarlyStopping::new(cfg.direction, cfg.patience, cfg.epochs));

        Ok(Self {
            rank,
            coordinator,
            replica: Replica::new(model),
            optimizer,
            loss,
            train_set,
            valid_set,
            schedule: Schedule::new(cfg.accumulation),
            stopping,
            store: CheckpointStore::for_config(&cfg),
            tracker,
            global_step: 0,
            cfg,
        })
    }

    fn is_coordinator(&self) -> bool {
        self.rank == self.coordinator
    }

    /// Runs every epoch and tears the group down.
    ///
    /// On success the group is destroyed once the loop exits, whether by early
    /// stopping or by reaching the last epoch. On failure it is dropped, which
    /// closes its connections and fails the peers still waiting on it.
    pub async fn run<C: Collective>(mut self, mut group: C) -> Result<Outcome> {
        match self.epochs(&mut group).await {
            Ok(outcome) => {
                group.destroy().await?;
                Ok(outcome)
            }
            Err(e) => {
                warn!(rank = self.rank; "training failed, leaving the group: {e}");
                Err(e)
            }
        }
    }

    async fn epochs<C: Collective>(&mut self, group: &mut C) -> Result<Outcome> {
        if group.rank() != self.rank || group.world_size() != self.cfg.world_size.get() {
            return Err(TrainErr::InvalidConfig(format!(
                "configured as rank {} of {}, joined as rank {} of {}",
                self.rank,
                self.cfg.world_size,
                group.rank(),
                group.world_size()
            )));
        }

        let world_size = self.cfg.world_size;
        let mut train_sampler = DistributedSampler::new(
            self.train_set.len(),
            self.rank,
            world_size,
            self.cfg.seed,
            Remainder::Drop,
        )?;
        let valid_sampler = DistributedSampler::new(
            self.valid_set.len(),
            self.rank,
            world_size,
            self.cfg.seed,
            Remainder::Keep,
        )?
        .without_shuffle();

        if train_sampler.num_samples() == 0 {
            return Err(TrainErr::InvalidDataset(format!(
                "{} training samples can't be split among {world_size} ranks",
                self.train_set.len()
            )));
        }

        self.replica.broadcast_params(group, self.coordinator).await?;
        if self.is_coordinator() {
            info!("number of model parameters: {}", self.replica.model().size());
        }

        let mut history = Vec::new();

        for epoch in 1..=self.cfg.epochs.get() {
            info!(rank = self.rank; "begin training epoch {epoch}");
            train_sampler.set_epoch(epoch);

            let train = self.train_epoch(group, epoch, &train_sampler).await?;
            let valid = self.validate(group, epoch, &valid_sampler).await?;

            if self.is_coordinator() {
                let mut record = train.clone();
                record.extend(valid.clone());
                record.insert("epoch".to_string(), epoch as f64);
                // Filed under the epoch's last training step.
                self.tracker.log(self.global_step.saturating_sub(1), &record)?;
            }

            let verdict = self.decide(group, epoch, &valid).await?;

            group.barrier().await?;
            if verdict.save && self.is_coordinator() {
                self.save_checkpoint(epoch)?;
            }
            // Nobody moves on before the checkpoint is on disk.
            group.barrier().await?;

            history.push(EpochReport {
                epoch,
                train,
                valid,
                verdict,
            });

            if let Some(reason) = verdict.stop {
                info!(rank = self.rank; "stopping after epoch {epoch}: {reason:?}");
                return Ok(Outcome {
                    reason,
                    history,
                    params: self.replica.model().params().to_vec(),
                });
            }
        }

        Ok(Outcome {
            reason: StopReason::MaxEpochs,
            history,
            params: self.replica.model().params().to_vec(),
        })
    }

    async fn train_epoch<C: Collective>(
        &mut self,
        group: &mut C,
        epoch: usize,
        sampler: &DistributedSampler,
    ) -> Result<Summary> {
        let Self {
            rank,
            coordinator,
            replica,
            optimizer,
            loss,
            train_set,
            schedule,
            tracker,
            global_step,
            cfg,
            ..
        } = self;

        replica.train();
        let loader = DataLoader::new(&*train_set, sampler, cfg.train_batch_size);
        let steps = loader.len();
        let mut metrics = EpochMetrics::new(Subset::Train);

        for (idx, batch) in loader.enumerate() {
            let plan = schedule.plan(idx);

            let step_loss = {
                let mut scope = replica.scope(!plan.sync);
                let output = scope.forward(&batch)?;
                let d_output = loss.loss_prime(&output, &batch.ys);
                scope.backward(group, &batch, &d_output).await?;
                loss.loss(&output, &batch.ys)
            };

            if plan.update {
                replica.step(optimizer);
            }

            metrics.update(step_loss);
            if *rank == *coordinator {
                tracker.log(*global_step, &metrics.last())?;
            }
            *global_step += 1;
        }

        if schedule.needs_flush(steps) {
            replica.flush(group, optimizer).await?;
        }

        debug!(rank = *rank; "finished {steps} training steps of epoch {epoch}");
        reduce(group, epoch, &metrics, *rank == *coordinator).await
    }

    async fn validate<C: Collective>(
        &mut self,
        group: &mut C,
        epoch: usize,
        sampler: &DistributedSampler,
    ) -> Result<Summary> {
        self.replica.eval();

        let loader = DataLoader::new(&self.valid_set, sampler, self.cfg.valid_batch_size);
        let mut metrics = EpochMetrics::new(Subset::Valid);

        for batch in loader {
            let output = self.replica.forward(&batch)?;
            metrics.update(self.loss.loss(&output, &batch.ys));
        }

        reduce(group, epoch, &metrics, self.is_coordinator()).await
    }

    /// Has the coordinator judge the epoch and shares its verdict.
    async fn decide<C: Collective>(
        &mut self,
        group: &mut C,
        epoch: usize,
        valid: &Summary,
    ) -> Result<Verdict> {
        let local = match self.stopping.as_mut() {
            Some(stopping) => {
                let score = valid.get(&avg_loss_key(Subset::Valid)).copied().unwrap_or(f64::NAN);
                let decision = stopping.observe(epoch, score);
                info!(
                    "epoch {epoch} is {:?}, best score {}, {} stalled epochs",
                    decision.state, decision.best, decision.stalled
                );
                decision.verdict.to_wire()
            }
            None => [0.0; 2],
        };

        let shared = broadcast(group, &local, self.coordinator).await?;
        Verdict::from_wire(&shared)
    }

    fn save_checkpoint(&self, epoch: usize) -> Result<()> {
        let best_score = self
            .stopping
            .as_ref()
            .and_then(EarlyStopping::best)
            .unwrap_or(f64::NAN);

        let checkpoint = Checkpoint {
            epoch,
            best_score,
            config: self.cfg.clone(),
            model: self.replica.model().state_dict(),
            optimizer: self.optimizer.state_dict(),
        };

        self.store.save(&checkpoint)
    }
}

/// Waits for every rank to finish the pass and merges their losses.
async fn reduce<C: Collective>(
    group: &mut C,
    epoch: usize,
    metrics: &EpochMetrics,
    is_coordinator: bool,
) -> Result<Summary> {
    group.barrier().await?;
    let gathered = group.all_gather(metrics.total_local()).await?;
    let summary = metrics.reduce_global(&gathered);

    if is_coordinator {
        info!("{}", format_record(epoch, metrics.subset(), &summary));
    }

    Ok(summary)
}
