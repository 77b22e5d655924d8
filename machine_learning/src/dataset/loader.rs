use std::{num::NonZeroUsize, sync::Arc};

use ndarray::{Array2, ArrayView1, Axis, parallel::prelude::*};
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{Batch, Dataset, DistributedSampler};
use crate::{MlErr, Result};

/// Batches a rank's partition of a dataset, gathering the rows on a dedicated thread pool.
#[derive(Clone)]
pub struct DataLoader {
    dataset: Arc<Dataset>,
    sampler: DistributedSampler,
    batch_size: NonZeroUsize,
    pool: Arc<ThreadPool>,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The whole dataset.
    /// * `sampler` - Decides which rows this rank visits and in which order.
    /// * `batch_size` - The amount of rows per batch.
    /// * `n_workers` - The amount of threads gathering rows.
    ///
    /// # Returns
    /// An error if the thread pool can't be built.
    pub fn new(
        dataset: Arc<Dataset>,
        sampler: DistributedSampler,
        batch_size: NonZeroUsize,
        n_workers: NonZeroUsize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_workers.get())
            .thread_name(|i| format!("loader-{i}"))
            .build()
            .map_err(|e| MlErr::InvalidConfig(format!("failed to build the loader pool: {e}")))?;

        Ok(Self {
            dataset,
            sampler,
            batch_size,
            pool: Arc::new(pool),
        })
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    #[inline]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Reseeds the sampler, affecting the iterators created afterwards.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.sampler.epoch()
    }

    /// Starts a pass over this rank's partition for the current epoch.
    pub fn iter(&self) -> EpochIter {
        EpochIter {
            dataset: Arc::clone(&self.dataset),
            pool: Arc::clone(&self.pool),
            indices: self.sampler.indices(),
            batch_size: self.batch_size.get(),
            cursor: 0,
        }
    }
}

/// One pass over a partition. The last batch may be smaller than the batch size.
pub struct EpochIter {
    dataset: Arc<Dataset>,
    pool: Arc<ThreadPool>,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl EpochIter {
    /// Returns the amount of batches left, counting a partial one.
    pub fn remaining(&self) -> usize {
        (self.indices.len() - self.cursor).div_ceil(self.batch_size)
    }

    fn gather(&self, idx: &[usize]) -> Batch {
        let ds = &*self.dataset;
        let mut x = Array2::zeros((idx.len(), ds.x_size()));
        let mut y = Array2::zeros((idx.len(), ds.y_size()));

        self.pool.install(|| {
            x.axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(idx)
                .for_each(|(mut row, &i)| row.assign(&ArrayView1::from(ds.x_row(i))));

            y.axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(idx)
                .for_each(|(mut row, &i)| row.assign(&ArrayView1::from(ds.y_row(i))));
        });

        Batch { x, y }
    }
}

impl Iterator for EpochIter {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.gather(&self.indices[self.cursor..end]);

        self.cursor = end;
        Some(batch)
    }
}
