use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Mode, Model, TensorSpec};
use crate::{MlErr, Result};

/// A model together with the parameters and gradient buffers it runs on.
#[derive(Debug, Clone)]
pub struct Network<M: Model> {
    model: M,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl<M: Model> Network<M> {
    /// Creates a new `Network` from existing parameters.
    ///
    /// # Returns
    /// A size mismatch error if `params` doesn't fit the model.
    pub fn new(model: M, params: Vec<f32>) -> Result<Self> {
        let size = model.size();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            model,
            params,
            grad: vec![0.0; size],
        })
    }

    /// Creates a new `Network` with freshly sampled parameters.
    pub fn init<R: Rng + ?Sized>(model: M, rng: &mut R) -> Result<Self> {
        let params = model.init_params(rng)?;
        Self::new(model, params)
    }

    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.model.forward(&self.params, x)
    }

    /// Backpropagates `d` from the last forward pass into the gradient buffer.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<()> {
        self.model.backward(&self.params, &mut self.grad, d)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Borrows the parameters mutably alongside the gradient, for an optimizer step.
    pub fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    /// Switches to inference, activations are no longer retained.
    pub fn eval(&mut self) {
        self.model.set_mode(Mode::Eval);
    }

    pub fn train(&mut self) {
        self.model.set_mode(Mode::Train);
    }

    pub fn mode(&self) -> Mode {
        self.model.mode()
    }

    /// Pairs every named tensor of the model with its slice of the parameters.
    pub fn tensors(&self) -> Vec<(TensorSpec, &[f32])> {
        self.model
            .tensors()
            .into_iter()
            .map(|spec| {
                let values = &self.params[spec.range.clone()];
                (spec, values)
            })
            .collect()
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}
