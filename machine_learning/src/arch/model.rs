use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::Result;

/// Whether a model retains what it needs for a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A named view over a contiguous range of the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

/// A model whose parameters live outside of it in a single flat buffer.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the model's output for a batch.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The output batch or an error if the shapes don't fit the model.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Backpropagates the delta of the loss with respect to the last output, writing the
    /// gradient of every parameter into `grad`.
    ///
    /// # Arguments
    /// * `params` - The model's parameters, the same ones used on the last forward pass.
    /// * `grad` - The buffer to write the gradient into, same layout as `params`.
    /// * `d` - The derivative of the loss with respect to the model's output.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    /// Describes how the flat parameter buffer splits into named tensors.
    fn tensors(&self) -> Vec<TensorSpec>;

    /// Samples a fresh set of parameters.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>>;
}
