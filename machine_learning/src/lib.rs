pub mod arch;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod optimization;

pub use error::{MlErr, Result};
