use std::{num::NonZeroUsize, time::Duration};

/// How long a rank waits for the whole group to assemble by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a rank needs to join its process group.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub rank: usize,
    pub world_size: NonZeroUsize,
    /// Host name or ip of the rank 0 process.
    pub addr: String,
    pub port: u16,
    pub timeout: Duration,
}

impl GroupConfig {
    /// Creates a new `GroupConfig` with the default rendezvous timeout.
    ///
    /// # Arguments
    /// * `rank` - The identity of this process inside the group.
    /// * `world_size` - The amount of processes in the group.
    /// * `addr` - The address rank 0 listens on.
    /// * `port` - The port rank 0 listens on.
    pub fn new(rank: usize, world_size: NonZeroUsize, addr: impl Into<String>, port: u16) -> Self {
        Self {
            rank,
            world_size,
            addr: addr.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this rank hosts the rendezvous.
    pub fn is_host(&self) -> bool {
        self.rank == 0
    }
}
