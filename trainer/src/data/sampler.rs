use std::num::NonZeroUsize;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{Result, TrainErr};

/// What to do with the samples left over when the dataset doesn't split evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remainder {
    /// Every rank gets exactly `len / world_size` samples.
    Drop,
    /// Every sample is assigned once, shard sizes differ by at most one.
    Keep,
}

/// Deterministically assigns a rank its shard of the dataset for each epoch.
///
/// The permutation depends only on `(seed, epoch)`, so every rank computes the
/// same one and picks the indices at `rank, rank + world_size, ...` from it.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: NonZeroUsize,
    seed: u64,
    epoch: usize,
    shuffle: bool,
    remainder: Remainder,
}

impl DistributedSampler {
    /// Creates a new shuffling `DistributedSampler` at epoch 0.
    ///
    /// # Arguments
    /// * `len` - The size of the dataset.
    /// * `rank` - The rank this sampler hands indices to.
    /// * `world_size` - The amount of ranks sharing the dataset.
    /// * `seed` - The base seed, shared by every rank.
    /// * `remainder` - The policy for the samples that don't split evenly.
    pub fn new(
        len: usize,
        rank: usize,
        world_size: NonZeroUsize,
        seed: u64,
        remainder: Remainder,
    ) -> Result<Self> {
        if rank >= world_size.get() {
            return Err(TrainErr::InvalidConfig(format!(
                "rank {rank} out of range for world size {world_size}"
            )));
        }

        Ok(Self {
            len,
            rank,
            world_size,
            seed,
            epoch: 0,
            shuffle: true,
            remainder,
        })
    }

    /// Keeps the natural order of the dataset.
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Re-seeds the shuffle for `epoch`.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// The amount of indices this rank receives each epoch.
    pub fn num_samples(&self) -> usize {
        let n = self.world_size.get();
        match self.remainder {
            Remainder::Drop => self.len / n,
            Remainder::Keep => self.len / n + usize::from(self.rank < self.len % n),
        }
    }

    /// The indices of this rank's shard for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();

        if self.shuffle {
            let seed = self.seed.wrapping_add(self.epoch as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        let n = self.world_size.get();
        if self.remainder == Remainder::Drop {
            order.truncate(self.len / n * n);
        }

        order.into_iter().skip(self.rank).step_by(n).collect()
    }
}
