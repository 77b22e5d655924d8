use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{Mode, TensorSpec, activations::ActFn, xavier_uniform},
};

/// What a forward pass leaves behind for the backward pass.
#[derive(Debug, Clone)]
struct Cache {
    x: Array2<f32>,
    z: Array2<f32>,
}

/// A fully connected layer, `a = act_fn(x · W + b)`.
///
/// Its parameters are laid out as the row-major `(n_in, n_out)` weights followed by the
/// `n_out` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
    cache: Option<Cache>,
}

impl Dense {
    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs.
    /// * `act_fn` - An optional activation for the output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            act_fn,
            size: (dim.0 + 1) * dim.1,
            cache: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Computes the output of the layer, keeping the input and pre-activation around only in
    /// training mode.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The input batch.
    /// * `mode` - The execution mode.
    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense layer input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let a = self.act_fn.as_ref().map(|act_fn| z.mapv(|z| act_fn.f(z)));
        self.cache = None;

        if mode == Mode::Eval {
            return Ok(a.unwrap_or(z));
        }

        let out = a.unwrap_or_else(|| z.clone());
        self.cache = Some(Cache { x: x.to_owned(), z });
        Ok(out)
    }

    /// Writes this layer's gradient and returns the delta for the previous layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's slice of the gradient buffer.
    /// * `d` - The derivative of the loss with respect to this layer's output.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let Some(Cache { x, z }) = self.cache.take() else {
            return Err(MlErr::NoForwardPass);
        };

        if d.dim() != z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense layer delta",
                got: d.len(),
                expected: z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    pub fn tensors(&self, prefix: &str, offset: usize) -> Vec<TensorSpec> {
        let w_size = self.size - self.dim.1;

        vec![
            TensorSpec {
                name: format!("{prefix}.weight"),
                shape: vec![self.dim.0, self.dim.1],
                range: offset..offset + w_size,
            },
            TensorSpec {
                name: format!("{prefix}.bias"),
                shape: vec![self.dim.1],
                range: offset + w_size..offset + self.size,
            },
        ]
    }

    /// Xavier uniform weights and zero biases.
    pub fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = xavier_uniform(rng, self.dim.0, self.dim.1)?;
        params.resize(self.size, 0.0);
        Ok(params)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense layer gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense layer parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected: self.size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // w = [[1, 2], [3, 4]], b = [0.5, -0.5]
    const PARAMS: [f32; 6] = [1., 2., 3., 4., 0.5, -0.5];

    #[test]
    fn forward_is_affine() {
        let mut layer = Dense::new((2, 2), None);
        let x = array![[1., 1.], [0., 2.]];

        let a = layer.forward(&PARAMS, x.view(), Mode::Train).unwrap();

        assert_eq!(a, array![[4.5, 5.5], [6.5, 7.5]]);
    }

    #[test]
    fn backward_writes_weight_and_bias_gradients() {
        let mut layer = Dense::new((2, 2), None);
        let x = array![[1., 1.], [0., 2.]];
        let mut grad = [0.; 6];

        layer.forward(&PARAMS, x.view(), Mode::Train).unwrap();
        let d_prev = layer
            .backward(&PARAMS, &mut grad, array![[1., 0.], [0., 1.]])
            .unwrap();

        // dW = x^T d, db = sum over rows of d, d_prev = d W^T
        assert_eq!(grad, [1., 0., 1., 2., 1., 1.]);
        assert_eq!(d_prev, array![[1., 3.], [2., 4.]]);
    }

    #[test]
    fn eval_mode_keeps_nothing_for_backward() {
        let mut layer = Dense::new((2, 2), Some(ActFn::relu()));
        let x = array![[1., 1.]];
        let mut grad = [0.; 6];

        layer.forward(&PARAMS, x.view(), Mode::Eval).unwrap();
        let err = layer
            .backward(&PARAMS, &mut grad, array![[1., 1.]])
            .unwrap_err();

        assert!(matches!(err, MlErr::NoForwardPass));
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let mut layer = Dense::new((2, 2), None);
        let x = array![[1., 1., 1.]];

        let err = layer.forward(&PARAMS, x.view(), Mode::Train).unwrap_err();

        assert!(matches!(
            err,
            MlErr::SizeMismatch {
                got: 3,
                expected: 2,
                ..
            }
        ));
    }
}
