mod batch;
mod dataset;
mod loader;
mod sampler;

pub use batch::Batch;
pub use dataset::Dataset;
pub use loader::{DataLoader, EpochIter};
pub use sampler::DistributedSampler;
