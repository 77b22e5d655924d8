use crate::{
    Result,
    arch::{Model, Network},
};

/// Scores a trained network over held-out data.
pub trait Evaluator {
    fn evaluate<M: Model>(&self, net: &mut Network<M>) -> Result<f32>;
}
