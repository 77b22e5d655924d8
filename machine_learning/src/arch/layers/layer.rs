use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::Dense;
use crate::{
    Result,
    arch::{Mode, TensorSpec, activations::ActFn},
};

#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Dense(Dense::new(dim, act_fn))
    }

    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
        }
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x, mode),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
        }
    }

    /// Names the tensors of this layer, `prefix` being the layer's name and `offset` the
    /// position of its first parameter in the model's buffer.
    pub fn tensors(&self, prefix: &str, offset: usize) -> Vec<TensorSpec> {
        match self {
            Dense(l) => l.tensors(prefix, offset),
        }
    }

    pub fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>> {
        match self {
            Dense(l) => l.init_params(rng),
        }
    }
}
