use collective::TcpGroup;
use log::info;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, TrainErr,
    arch::{Linear, Mse},
    config::TrainConfig,
    data::{Dataset, InMemoryDataset, Subset},
    device::Device,
    loop_::{Outcome, TrainingLoop},
    optimization::GradientDescent,
    tracking,
};

/// The training loop of a rank, wired with the built-in collaborators.
pub type LinearLoop = TrainingLoop<Linear, GradientDescent, Mse, InMemoryDataset>;

/// Builds everything a rank needs before it joins the group.
///
/// # Errors
/// Any setup failure: a bad configuration, resume requested, a missing device
/// or an unreadable dataset.
pub fn build(cfg: &TrainConfig, rank: usize) -> Result<LinearLoop> {
    cfg.validate()?;
    if cfg.resume {
        return Err(TrainErr::ResumeUnsupported);
    }

    let device = Device::bind(rank, cfg.available_devices())?;
    info!(rank = rank; "bound to {device}");

    let train_set = InMemoryDataset::load(&cfg.input_path, Subset::Train)?;
    let valid_set = InMemoryDataset::load(&cfg.input_path, Subset::Valid)?;
    info!(
        rank = rank;
        "loaded {} training and {} validation samples",
        train_set.len(),
        valid_set.len()
    );

    // Every rank seeds alike, the coordinator's draw is broadcast anyway.
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let model = Linear::new(train_set.x_size(), train_set.y_size(), &mut rng);
    let optimizer = GradientDescent::new(cfg.lr).with_momentum(cfg.momentum);
    let tracker = tracking::for_rank(cfg, rank == cfg.coordinator_rank())?;

    TrainingLoop::new(
        cfg.clone(),
        rank,
        model,
        optimizer,
        Mse::new(),
        train_set,
        valid_set,
        tracker,
    )
}

/// Runs `rank` of the configured run to completion.
pub async fn run(cfg: TrainConfig, rank: usize) -> Result<Outcome> {
    let training = build(&cfg, rank)?;
    let group = TcpGroup::init(&cfg.group_config(rank)).await?;
    training.run(group).await
}
