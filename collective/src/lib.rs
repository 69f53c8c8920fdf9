//! Collective communication for a fixed group of training processes.
//!
//! Rank 0 hosts the rendezvous and relays every collective, the remaining
//! ranks connect to it. All ranks must issue the same collectives in the same
//! order, a rank that never arrives stalls the rest of the group.

mod config;
mod error;
mod group;
mod ops;
mod tcp;

pub use config::GroupConfig;
pub use error::{CollectiveErr, Result};
pub use group::Collective;
pub use ops::{all_reduce_mean, broadcast};
pub use tcp::TcpGroup;
