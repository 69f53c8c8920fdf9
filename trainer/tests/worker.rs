use std::{fs, path::Path};

use trainer::{TrainConfig, TrainErr, checkpoint::CheckpointStore, stopping::StopReason, worker};

fn write_run(dir: &Path, overrides: serde_json::Value) -> TrainConfig {
    let train: Vec<f32> = (0..16).flat_map(|i| [i as f32 / 16.0, 1.0 - i as f32 / 16.0]).collect();
    let valid: Vec<f32> = (0..4).flat_map(|i| [i as f32 / 4.0, 1.0 - i as f32 / 4.0]).collect();

    let input_path = dir.join("data.json");
    let data = serde_json::json!({ "x_size": 1, "y_size": 1, "train": train, "valid": valid });
    fs::write(&input_path, data.to_string()).unwrap();

    let mut cfg = serde_json::json!({
        "experiment_name": "solo",
        "input_path": input_path,
        "save_dir": dir.join("runs"),
        "lr": 0.2,
        "seed": 3,
        "epochs": 4,
        "train_batch_size": 4,
        "valid_batch_size": 4,
        "tracking": true
    });
    if let (Some(cfg), Some(overrides)) = (cfg.as_object_mut(), overrides.as_object()) {
        cfg.extend(overrides.clone());
    }

    let config_path = dir.join("config.json");
    fs::write(&config_path, cfg.to_string()).unwrap();
    TrainConfig::from_path(&config_path).unwrap()
}

#[tokio::test]
async fn single_rank_run_checkpoints_and_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_run(dir.path(), serde_json::json!({}));

    let outcome = worker::run(cfg.clone(), 0).await.unwrap();
    assert_eq!(outcome.reason, StopReason::MaxEpochs);
    assert_eq!(outcome.epochs_run(), 4);

    let ckpt = CheckpointStore::for_config(&cfg).load().unwrap();
    assert_eq!(ckpt.config, cfg);

    let tracked = fs::read_to_string(dir.path().join("runs/solo_metrics.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = tracked
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    // 4 steps and one epoch record per epoch.
    assert_eq!(records.len(), 4 * 5);
    let epoch_records: Vec<_> = records.iter().filter(|r| r.get("epoch").is_some()).collect();
    assert_eq!(epoch_records.len(), 4);
    assert!(epoch_records[0].get("valid/avg_loss").is_some());

    // Steps count up without gaps and each epoch record shares its last step.
    let steps: Vec<u64> = records.iter().map(|r| r["step"].as_u64().unwrap()).collect();
    let mut expected = Vec::new();
    for epoch in 0..4 {
        expected.extend(epoch * 4..epoch * 4 + 4);
        expected.push(epoch * 4 + 3);
    }
    assert_eq!(steps, expected);
}

#[test]
fn missing_device_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_run(dir.path(), serde_json::json!({ "world_size": 2, "devices": 1 }));

    assert!(matches!(
        worker::build(&cfg, 1),
        Err(TrainErr::DeviceUnavailable {
            rank: 1,
            available: 1
        })
    ));
}

#[test]
fn missing_dataset_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_run(dir.path(), serde_json::json!({}));
    fs::remove_file(&cfg.input_path).unwrap();

    assert!(matches!(worker::build(&cfg, 0), Err(TrainErr::Io(_))));
}
