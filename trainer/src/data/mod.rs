pub mod dataloader;
pub mod dataset;
pub mod sampler;

use std::fmt;

pub use dataloader::DataLoader;
pub use dataset::{Batch, Dataset, InMemoryDataset, Sample};
pub use sampler::{DistributedSampler, Remainder};

/// The split of the data a pass runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Train,
    Valid,
}

impl Subset {
    pub fn as_str(self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Valid => "valid",
        }
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
