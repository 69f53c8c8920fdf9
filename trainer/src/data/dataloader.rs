use std::num::NonZeroUsize;

use super::{Batch, Dataset, DistributedSampler, Sample};

/// Walks a rank's shard in batches, collated through the dataset.
#[derive(Debug, Clone)]
pub struct DataLoader<'d, D> {
    dataset: &'d D,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'d, D: Dataset> DataLoader<'d, D> {
    /// Creates a loader over the shard `sampler` currently assigns.
    pub fn new(dataset: &'d D, sampler: &DistributedSampler, batch_size: NonZeroUsize) -> Self {
        Self {
            dataset,
            indices: sampler.indices(),
            batch_size: batch_size.get(),
            cursor: 0,
        }
    }

    /// The amount of batches in the shard, a trailing short batch included.
    pub fn len(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns the next batch of the shard, or None if exhausted.
    pub fn next_batch(&mut self) -> Option<Batch> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let dataset = self.dataset;
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let samples: Vec<Sample<'d>> = self.indices[self.cursor..end]
            .iter()
            .map(|&idx| dataset.get(idx))
            .collect();

        self.cursor = end;
        Some(dataset.collate(&samples))
    }
}

impl<D: Dataset> Iterator for DataLoader<'_, D> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
