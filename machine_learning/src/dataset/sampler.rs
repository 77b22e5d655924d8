use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Splits a dataset's indices across the ranks of a group, reshuffling on every epoch.
///
/// Every rank draws the same permutation of `0..len` from `seed + epoch` and keeps the
/// positions `rank, rank + world_size, ...` of it, so within an epoch the partitions are
/// disjoint, cover the dataset and differ in size by at most one.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    seed: u64,
    shuffle: bool,
    epoch: u64,
}

impl DistributedSampler {
    /// Creates a new `DistributedSampler`.
    ///
    /// # Arguments
    /// * `len` - The amount of samples in the dataset.
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of processes sharing the dataset.
    /// * `seed` - The seed shared by every process.
    ///
    /// # Returns
    /// An error if `rank` is out of range.
    pub fn new(len: usize, rank: usize, world_size: usize, seed: u64) -> Result<Self> {
        if rank >= world_size {
            return Err(MlErr::InvalidConfig(format!(
                "rank {rank} is out of range for a world of {world_size}"
            )));
        }

        Ok(Self {
            len,
            rank,
            world_size,
            seed,
            shuffle: true,
            epoch: 0,
        })
    }

    /// Keeps the dataset order, only partitioning it.
    pub fn sequential(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Reseeds the sampler for `epoch`.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the amount of samples this rank visits per epoch.
    pub fn num_samples(&self) -> usize {
        self.len.saturating_sub(self.rank).div_ceil(self.world_size)
    }

    /// Returns this rank's indices for the current epoch, in visiting order.
    pub fn indices(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }

        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}
