use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use collective::GroupConfig;
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr, stopping::Direction};

/// The full run configuration, loaded from a json file.
///
/// Every rank reads the same file, the only thing that differs between the
/// workers of a run is the rank they are given on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub experiment_name: String,
    pub input_path: PathBuf,
    pub save_dir: PathBuf,
    #[serde(default = "default_save_prefix")]
    pub save_prefix: String,
    pub lr: f32,
    #[serde(default)]
    pub momentum: f32,
    #[serde(default)]
    pub seed: u64,
    pub epochs: NonZeroUsize,
    pub train_batch_size: NonZeroUsize,
    pub valid_batch_size: NonZeroUsize,
    /// Consecutive non improving epochs tolerated, 0 disables early stopping.
    #[serde(default)]
    pub patience: usize,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "one")]
    pub accumulation: NonZeroUsize,
    #[serde(default = "one")]
    pub world_size: NonZeroUsize,
    #[serde(default = "default_master_addr")]
    pub master_addr: String,
    #[serde(default = "default_master_port")]
    pub master_port: u16,
    #[serde(default = "default_rendezvous_timeout_secs")]
    pub rendezvous_timeout_secs: u64,
    /// Devices on this host, defaults to one per rank.
    #[serde(default)]
    pub devices: Option<usize>,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub tracking: bool,
}

fn default_save_prefix() -> String {
    "checkpoint".to_string()
}

fn one() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_master_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_master_port() -> u16 {
    29500
}

fn default_rendezvous_timeout_secs() -> u64 {
    60
}

impl TrainConfig {
    /// Reads and validates the configuration at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the constraints the types can't express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrainErr::InvalidConfig(msg));

        if !is_file_stem(&self.experiment_name) {
            return invalid(format!(
                "experiment_name must be a non empty file name, got {:?}",
                self.experiment_name
            ));
        }

        if !is_file_stem(&self.save_prefix) {
            return invalid(format!(
                "save_prefix must be a non empty file name, got {:?}",
                self.save_prefix
            ));
        }

        if !self.lr.is_finite() || self.lr < 0.0 {
            return invalid(format!("lr must be finite and non negative, got {}", self.lr));
        }

        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }

        if self.rendezvous_timeout_secs == 0 {
            return invalid("rendezvous_timeout_secs must be positive".to_string());
        }

        if self.devices == Some(0) {
            return invalid("devices must be positive when given".to_string());
        }

        Ok(())
    }

    /// The rank that logs, tracks, decides and checkpoints.
    pub fn coordinator_rank(&self) -> usize {
        self.world_size.get() - 1
    }

    pub fn available_devices(&self) -> usize {
        self.devices.unwrap_or(self.world_size.get())
    }

    /// The rendezvous settings handed to the collective layer for `rank`.
    pub fn group_config(&self, rank: usize) -> GroupConfig {
        GroupConfig::new(rank, self.world_size, self.master_addr.clone(), self.master_port)
            .with_timeout(Duration::from_secs(self.rendezvous_timeout_secs))
    }
}

fn is_file_stem(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "experiment_name": "linreg",
        "input_path": "data.json",
        "save_dir": "runs",
        "lr": 0.1,
        "epochs": 3,
        "train_batch_size": 4,
        "valid_batch_size": 8
    }"#;

    #[test]
    fn optional_fields_take_defaults() {
        let cfg: TrainConfig = serde_json::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.save_prefix, "checkpoint");
        assert_eq!(cfg.patience, 0);
        assert_eq!(cfg.direction, Direction::Lower);
        assert_eq!(cfg.accumulation.get(), 1);
        assert_eq!(cfg.world_size.get(), 1);
        assert_eq!(cfg.coordinator_rank(), 0);
        assert_eq!(cfg.available_devices(), 1);
        assert!(!cfg.resume);
        assert!(!cfg.tracking);
    }

    #[test]
    fn zero_epochs_is_rejected_by_the_parser() {
        let raw = MINIMAL.replace(r#""epochs": 3"#, r#""epochs": 0"#);
        assert!(serde_json::from_str::<TrainConfig>(&raw).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let raw = MINIMAL.replace(r#""lr": 0.1"#, r#""lr": 0.1, "learning_rate": 0.2"#);
        assert!(serde_json::from_str::<TrainConfig>(&raw).is_err());
    }

    #[test]
    fn validate_catches_bad_values() {
        let mut cfg: TrainConfig = serde_json::from_str(MINIMAL).unwrap();
        cfg.momentum = 1.0;
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));

        let mut cfg: TrainConfig = serde_json::from_str(MINIMAL).unwrap();
        cfg.experiment_name = "../escape".to_string();
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));

        let mut cfg: TrainConfig = serde_json::from_str(MINIMAL).unwrap();
        cfg.lr = f32::NAN;
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn group_config_carries_the_rendezvous() {
        let raw = MINIMAL.replace(
            r#""lr": 0.1"#,
            r#""lr": 0.1, "world_size": 4, "master_port": 4000, "rendezvous_timeout_secs": 5"#,
        );
        let cfg: TrainConfig = serde_json::from_str(&raw).unwrap();

        let group = cfg.group_config(2);
        assert_eq!(group.rank, 2);
        assert_eq!(group.world_size.get(), 4);
        assert_eq!(group.port, 4000);
        assert_eq!(group.timeout, Duration::from_secs(5));
        assert_eq!(cfg.coordinator_rank(), 3);
    }
}
