use std::{fs, num::NonZeroUsize, path::Path, time::Duration};

use collective::{GroupConfig, TcpGroup};
use tokio::{net::TcpListener, task::JoinSet};
use trainer::{
    Outcome, TrainConfig, TrainErr, TrainingLoop,
    arch::{Linear, Mse},
    checkpoint::CheckpointStore,
    data::{DistributedSampler, InMemoryDataset, Remainder},
    optimization::GradientDescent,
    stopping::StopReason,
    tracking::NoopTracker,
};

type LinearLoop = TrainingLoop<Linear, GradientDescent, Mse, InMemoryDataset>;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Rows of `y = 2x + 1` over `[0, 1)`.
fn line(rows: usize) -> Vec<f32> {
    (0..rows)
        .flat_map(|i| {
            let x = i as f32 / rows as f32;
            [x, 2.0 * x + 1.0]
        })
        .collect()
}

fn config(save_dir: &Path, world_size: usize, overrides: serde_json::Value) -> TrainConfig {
    let mut cfg = serde_json::json!({
        "experiment_name": "line",
        "input_path": "unused.json",
        "save_dir": save_dir,
        "lr": 0.0,
        "seed": 7,
        "epochs": 3,
        "train_batch_size": 2,
        "valid_batch_size": 2,
        "world_size": world_size
    });

    if let (Some(cfg), Some(overrides)) = (cfg.as_object_mut(), overrides.as_object()) {
        cfg.extend(overrides.clone());
    }

    serde_json::from_value(cfg).unwrap()
}

fn build(cfg: &TrainConfig, rank: usize, params: Vec<f32>, train: &[f32], valid: &[f32]) -> LinearLoop {
    TrainingLoop::new(
        cfg.clone(),
        rank,
        Linear::from_params(1, 1, params).unwrap(),
        GradientDescent::new(cfg.lr),
        Mse::new(),
        InMemoryDataset::new(train.to_vec(), 1, 1).unwrap(),
        InMemoryDataset::new(valid.to_vec(), 1, 1).unwrap(),
        Box::new(NoopTracker),
    )
    .unwrap()
}

/// Runs every loop as its own rank of a loopback group.
async fn run_ranks(loops: Vec<LinearLoop>) -> Vec<trainer::Result<Outcome>> {
    let world_size = loops.len();
    let world = NonZeroUsize::new(world_size).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut listener = Some(listener);

    let mut tasks = JoinSet::new();
    for (rank, training) in loops.into_iter().enumerate() {
        let cfg = GroupConfig::new(rank, world, "127.0.0.1", port).with_timeout(TIMEOUT);
        let host = if rank == 0 { listener.take() } else { None };

        tasks.spawn(async move {
            let group = match host {
                Some(listener) => TcpGroup::host(listener, &cfg).await,
                None => TcpGroup::join(&cfg).await,
            };

            let outcome = match group {
                Ok(group) => training.run(group).await,
                Err(e) => Err(TrainErr::from(e)),
            };

            (rank, outcome)
        });
    }

    let mut outcomes: Vec<Option<_>> = (0..world_size).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (rank, outcome) = joined.unwrap();
        outcomes[rank] = Some(outcome);
    }

    outcomes.into_iter().map(Option::unwrap).collect()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_ranks_reduce_to_the_mean_of_their_losses() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 2, serde_json::json!({}));
    let train = line(20);
    let valid = line(5);

    // Rank 1 coordinates, its parameters are the ones every replica starts from.
    let loops = vec![
        build(&cfg, 0, vec![9.0, 9.0], &train, &valid),
        build(&cfg, 1, vec![0.5, 0.0], &train, &valid),
    ];
    let outcomes: Vec<Outcome> = run_ranks(loops)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes[0].history, outcomes[1].history);

    // lr is 0 so the loss of every batch of 2 rows is fixed, and the mean over
    // both ranks' 5 batches is the mean over all 20 rows.
    let expected = train
        .chunks(2)
        .map(|row| (0.5 * f64::from(row[0]) - f64::from(row[1])).powi(2))
        .sum::<f64>()
        / 20.0;

    for report in &outcomes[0].history {
        assert_eq!(report.train["train/steps"], 10.0);
        assert!((report.train["train/avg_loss"] - expected).abs() < 1e-5);
        // 5 validation rows split 3/2, in batches of 2.
        assert_eq!(report.valid["valid/steps"], 3.0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_improving_epochs_are_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 2, serde_json::json!({}));
    let train = line(20);
    let valid = line(6);

    let loops = vec![
        build(&cfg, 0, vec![0.5, 0.0], &train, &valid),
        build(&cfg, 1, vec![0.5, 0.0], &train, &valid),
    ];
    let outcomes = run_ranks(loops).await;

    for outcome in outcomes {
        let outcome = outcome.unwrap();
        assert_eq!(outcome.reason, StopReason::MaxEpochs);
        assert_eq!(outcome.epochs_run(), 3);

        let saves: Vec<_> = outcome.history.iter().map(|r| r.verdict.save).collect();
        assert_eq!(saves, [true, false, false]);
    }

    assert_eq!(files_in(dir.path()), ["line_checkpoint_best.safetensors"]);

    let ckpt = CheckpointStore::for_config(&cfg).load().unwrap();
    assert_eq!(ckpt.epoch, 1);
    assert_eq!(ckpt.config, cfg);
    assert_eq!(ckpt.model["weight"].data, [0.5]);
    assert_eq!(ckpt.model["bias"].data, [0.0]);
    assert!(ckpt.optimizer.contains_key("lr"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_rank_stops_on_the_coordinators_decision() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        3,
        serde_json::json!({ "epochs": 10, "patience": 1 }),
    );
    let train = line(12);
    let valid = line(4);

    let loops = (0..3)
        .map(|rank| build(&cfg, rank, vec![1.0, 1.0], &train, &valid))
        .collect();

    for outcome in run_ranks(loops).await {
        let outcome = outcome.unwrap();
        assert_eq!(outcome.reason, StopReason::Patience);
        assert_eq!(outcome.epochs_run(), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accumulated_training_reduces_the_loss() {
    let dir = tempfile::tempdir().unwrap();
    // 10 steps per rank, windows of 3 leave one step to flush each epoch.
    let cfg = config(
        dir.path(),
        2,
        serde_json::json!({ "lr": 0.1, "epochs": 8, "accumulation": 3 }),
    );
    let train = line(40);
    let valid = line(10);

    let loops = vec![
        build(&cfg, 0, vec![0.5, 0.0], &train, &valid),
        build(&cfg, 1, vec![0.5, 0.0], &train, &valid),
    ];
    let outcomes: Vec<Outcome> = run_ranks(loops)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes[0].history, outcomes[1].history);

    let history = &outcomes[1].history;
    let first = history[0].valid["valid/avg_loss"];
    let last = history[history.len() - 1].valid["valid/avg_loss"];
    assert!(last < first, "loss went from {first} to {last}");

    let best_epoch = history
        .iter()
        .filter(|r| r.verdict.save)
        .map(|r| r.epoch)
        .max()
        .unwrap();
    let ckpt = CheckpointStore::for_config(&cfg).load().unwrap();
    assert_eq!(ckpt.epoch, best_epoch);
}

/// Gradient of the mean squared error of `w * x + b` over `rows` of `data`.
fn line_grad(params: [f64; 2], rows: &[usize], data: &[f32]) -> [f64; 2] {
    let scale = 2.0 / rows.len() as f64;
    rows.iter().fold([0.0; 2], |[dw, db], &i| {
        let x = f64::from(data[2 * i]);
        let y = f64::from(data[2 * i + 1]);
        let d = (params[0] * x + params[1] - y) * scale;
        [dw + x * d, db + d]
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicas_end_with_the_same_parameters() {
    let dir = tempfile::tempdir().unwrap();
    // 3 steps per rank, the window of 2 leaves the last one to flush.
    let cfg = config(
        dir.path(),
        2,
        serde_json::json!({ "lr": 0.3, "epochs": 2, "accumulation": 2 }),
    );
    let train = line(12);
    let valid = line(4);

    let loops = vec![
        build(&cfg, 0, vec![9.0, -3.0], &train, &valid),
        build(&cfg, 1, vec![0.5, 0.0], &train, &valid),
    ];
    let outcomes: Vec<Outcome> = run_ranks(loops)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes[0].params, outcomes[1].params);

    // The same run in one process: start from the coordinator's parameters and
    // step with the mean over both ranks of each window's summed gradients.
    let world = NonZeroUsize::new(2).unwrap();
    let mut params = [0.5f64, 0.0];
    for epoch in 1..=2 {
        let shards: Vec<Vec<usize>> = (0..2)
            .map(|rank| {
                let mut sampler =
                    DistributedSampler::new(train.len() / 2, rank, world, cfg.seed, Remainder::Drop)
                        .unwrap();
                sampler.set_epoch(epoch);
                sampler.indices()
            })
            .collect();

        for window in [0..2, 2..3] {
            let mut mean = [0.0; 2];
            for shard in &shards {
                let batches: Vec<&[usize]> = shard.chunks(2).collect();
                for batch in &batches[window.clone()] {
                    let [dw, db] = line_grad(params, batch, &train);
                    mean[0] += dw / 2.0;
                    mean[1] += db / 2.0;
                }
            }
            params[0] -= 0.3 * mean[0];
            params[1] -= 0.3 * mean[1];
        }
    }

    let got = &outcomes[0].params;
    assert!((f64::from(got[0]) - params[0]).abs() < 1e-4, "{got:?} vs {params:?}");
    assert!((f64::from(got[1]) - params[1]).abs() < 1e-4, "{got:?} vs {params:?}");
}

#[test]
fn resuming_is_explicitly_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 1, serde_json::json!({ "resume": true }));

    let res = TrainingLoop::new(
        cfg,
        0,
        Linear::from_params(1, 1, vec![0.0, 0.0]).unwrap(),
        GradientDescent::new(0.1),
        Mse::new(),
        InMemoryDataset::new(line(4), 1, 1).unwrap(),
        InMemoryDataset::new(line(2), 1, 1).unwrap(),
        Box::new(NoopTracker),
    );

    assert!(matches!(res, Err(TrainErr::ResumeUnsupported)));
}
