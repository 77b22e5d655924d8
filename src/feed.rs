use log::{debug, trace};
use machine_learning::dataset::{Batch, DataLoader, EpochIter};

use crate::error::{Result, TrainErr};

/// The outcome of drawing from an `EpochFeed`.
#[derive(Debug)]
pub enum Fetch {
    Batch(Batch),
    /// The current epoch has no full batch left.
    Exhausted,
}

/// Turns a finite, per-epoch sequence of batches into an unbounded one.
///
/// Partial batches are dropped: every batch handed out has exactly the loader's batch size.
pub struct EpochFeed {
    loader: DataLoader,
    iter: EpochIter,
    epoch: u64,
}

impl EpochFeed {
    /// Creates a new `EpochFeed` positioned at the start of epoch 0.
    pub fn new(mut loader: DataLoader) -> Self {
        loader.set_epoch(0);
        let iter = loader.iter();

        Self {
            loader,
            iter,
            epoch: 0,
        }
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Draws the next full batch of the current epoch.
    pub fn next(&mut self) -> Fetch {
        let batch_size = self.loader.batch_size();

        for batch in self.iter.by_ref() {
            if batch.len() == batch_size {
                return Fetch::Batch(batch);
            }

            trace!(epoch = self.epoch, len = batch.len(); "discarding a partial batch");
        }

        Fetch::Exhausted
    }

    /// Moves on to the next epoch, reshuffling the partition, and draws its first batch.
    ///
    /// # Returns
    /// An error if the new epoch has no full batch.
    pub fn rollover(&mut self) -> Result<Batch> {
        self.epoch += 1;
        self.loader.set_epoch(self.epoch);
        self.iter = self.loader.iter();
        debug!(epoch = self.epoch; "starting a new epoch");

        match self.next() {
            Fetch::Batch(batch) => Ok(batch),
            Fetch::Exhausted => Err(TrainErr::EmptyEpoch { epoch: self.epoch }),
        }
    }
}
