mod optimizer;
mod schedule;
mod sgd;

pub use optimizer::Optimizer;
pub use schedule::{LrScheduler, ScheduleParams, WarmupPolyLr};
pub use sgd::Sgd;
