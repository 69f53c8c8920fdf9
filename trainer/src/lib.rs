//! Synchronous data parallel training over a fixed group of processes.
//!
//! Each rank trains a replica of the model on its shard of the data, averaging
//! gradients through the [`collective`] crate. One rank, the coordinator,
//! logs the epoch summaries, decides when to checkpoint and when to stop, and
//! shares its decisions with the rest.

pub mod arch;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod launch;
pub mod loop_;
pub mod metrics;
pub mod optimization;
pub mod replica;
pub mod schedule;
pub mod stopping;
pub mod tracking;
pub mod worker;

pub use config::TrainConfig;
pub use error::{Result, TrainErr};
pub use loop_::{EpochReport, Outcome, TrainingLoop};
