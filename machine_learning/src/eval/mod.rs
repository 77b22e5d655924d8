mod evaluator;
mod miou;

pub use evaluator::Evaluator;
pub use miou::MeanIou;
