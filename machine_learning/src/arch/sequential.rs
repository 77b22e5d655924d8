use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Mode, Model, TensorSpec, layers::Layer};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    mode: Mode,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
            mode: Mode::Train,
        }
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        let expected = self.size();

        if len != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    fn forward(&mut self, mut params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len("model parameters", params.len())?;

        let mode = self.mode;
        let mut out = x.to_owned();

        for layer in self.layers.iter_mut() {
            let (layer_params, rest) = params.split_at(layer.size());
            out = layer.forward(layer_params, out.view(), mode)?;
            params = rest;
        }

        Ok(out)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_len("model parameters", params.len())?;
        self.check_len("model gradient", grad.len())?;

        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn tensors(&self) -> Vec<TensorSpec> {
        let mut offset = 0;
        let mut tensors = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            tensors.extend(layer.tensors(&format!("layers.{i}"), offset));
            offset += layer.size();
        }

        tensors
    }

    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());

        for layer in &self.layers {
            params.extend(layer.init_params(rng)?);
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::activations::ActFn;

    fn model() -> Sequential {
        Sequential::new([
            Layer::dense((3, 4), Some(ActFn::relu())),
            Layer::dense((4, 2), None),
        ])
    }

    #[test]
    fn size_adds_up_layers() {
        assert_eq!(model().size(), 4 * 4 + 5 * 2);
    }

    #[test]
    fn tensors_cover_the_buffer_in_order() {
        let tensors = model().tensors();
        let names: Vec<_> = tensors.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(
            names,
            [
                "layers.0.weight",
                "layers.0.bias",
                "layers.1.weight",
                "layers.1.bias"
            ]
        );
        assert_eq!(tensors[0].shape, [3, 4]);
        assert_eq!(tensors[3].range, 24..26);
    }

    #[test]
    fn forward_then_backward_fills_the_gradient() {
        let mut model = model();
        let params = vec![0.1; model.size()];
        let mut grad = vec![0.0; model.size()];

        let out = model
            .forward(&params, array![[1., 2., 3.]].view())
            .unwrap();
        assert_eq!(out.dim(), (1, 2));

        model
            .backward(&params, &mut grad, Array2::ones((1, 2)))
            .unwrap();
        assert!(grad.iter().all(|g| *g != 0.0));
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let mut model = model();
        let err = model.forward(&[0.0; 3], array![[1., 2., 3.]].view());

        assert!(matches!(err, Err(MlErr::SizeMismatch { got: 3, .. })));
    }
}
