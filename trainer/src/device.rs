use std::fmt;

use crate::{Result, TrainErr};

/// The accelerator a rank computes on, one per rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    ordinal: usize,
}

impl Device {
    /// Binds `rank` to the device with the same ordinal.
    ///
    /// # Errors
    /// `DeviceUnavailable` if there are not enough devices for this rank.
    pub fn bind(rank: usize, available: usize) -> Result<Self> {
        if rank >= available {
            return Err(TrainErr::DeviceUnavailable { rank, available });
        }

        Ok(Self { ordinal: rank })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.ordinal)
    }
}
