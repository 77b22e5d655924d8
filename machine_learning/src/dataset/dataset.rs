use std::{collections::HashMap, path::Path};

use ndarray::ArrayView2;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result};

const X_TENSOR: &str = "x";
const Y_TENSOR: &str = "y";

/// An in-memory dataset of fixed width rows.
///
/// Samples are stored row-major: row `i` of the inputs is `x[i * x_size..(i + 1) * x_size]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Vec<f32>,
    y: Vec<f32>,
    x_size: usize,
    y_size: usize,
}

impl Dataset {
    /// Creates a new `Dataset` from owned buffers.
    ///
    /// # Arguments
    /// * `x` - The inputs, row-major.
    /// * `x_size` - The width of an input row.
    /// * `y` - The targets, row-major.
    /// * `y_size` - The width of a target row.
    ///
    /// # Returns
    /// An error if either buffer isn't a whole amount of rows or they disagree on the amount.
    pub fn new(x: Vec<f32>, x_size: usize, y: Vec<f32>, y_size: usize) -> Result<Self> {
        if x_size == 0 || y_size == 0 {
            return Err(MlErr::InvalidConfig("dataset rows can't be empty".into()));
        }

        if x.len() % x_size != 0 {
            return Err(MlErr::SizeMismatch {
                what: "dataset inputs",
                got: x.len(),
                expected: x.len() / x_size * x_size,
            });
        }

        let rows = x.len() / x_size;
        if y.len() != rows * y_size {
            return Err(MlErr::SizeMismatch {
                what: "dataset targets",
                got: y.len(),
                expected: rows * y_size,
            });
        }

        Ok(Self {
            x,
            y,
            x_size,
            y_size,
        })
    }

    /// Loads a dataset from a safetensors file holding two 2D `F32` tensors, `x` and `y`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let tensors = SafeTensors::deserialize(&bytes)?;

        let (x, x_size) = read_matrix(&tensors, X_TENSOR)?;
        let (y, y_size) = read_matrix(&tensors, Y_TENSOR)?;
        Self::new(x, x_size, y, y_size)
    }

    /// Writes the dataset in the format `load` reads.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let x_bytes: &[u8] = bytemuck::cast_slice(&self.x);
        let y_bytes: &[u8] = bytemuck::cast_slice(&self.y);

        let tensors = [
            (
                X_TENSOR,
                TensorView::new(Dtype::F32, vec![self.len(), self.x_size], x_bytes)?,
            ),
            (
                Y_TENSOR,
                TensorView::new(Dtype::F32, vec![self.len(), self.y_size], y_bytes)?,
            ),
        ];

        safetensors::serialize_to_file(tensors, &None::<HashMap<String, String>>, path.as_ref())?;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len() / self.x_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[inline]
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    #[inline]
    pub fn y_size(&self) -> usize {
        self.y_size
    }

    /// Returns the input row at `idx` (panics if out of bounds).
    #[inline]
    pub fn x_row(&self, idx: usize) -> &[f32] {
        &self.x[idx * self.x_size..(idx + 1) * self.x_size]
    }

    /// Returns the target row at `idx` (panics if out of bounds).
    #[inline]
    pub fn y_row(&self, idx: usize) -> &[f32] {
        &self.y[idx * self.y_size..(idx + 1) * self.y_size]
    }

    /// Returns `amount` consecutive rows starting at `row`, fewer if the dataset ends first.
    pub fn rows(
        &self,
        row: usize,
        amount: usize,
    ) -> Result<(ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let start = row.min(self.len());
        let end = (row + amount).min(self.len());
        let n = end - start;

        let x = ArrayView2::from_shape(
            (n, self.x_size),
            &self.x[start * self.x_size..end * self.x_size],
        )?;
        let y = ArrayView2::from_shape(
            (n, self.y_size),
            &self.y[start * self.y_size..end * self.y_size],
        )?;

        Ok((x, y))
    }
}

/// Reads a 2D `F32` tensor, returning its values and its row width.
fn read_matrix(tensors: &SafeTensors<'_>, name: &'static str) -> Result<(Vec<f32>, usize)> {
    let view = tensors.tensor(name)?;

    if view.dtype() != Dtype::F32 {
        return Err(MlErr::InvalidConfig(format!(
            "tensor {name} must be F32, got {:?}",
            view.dtype()
        )));
    }

    let &[_, width] = view.shape() else {
        return Err(MlErr::InvalidConfig(format!(
            "tensor {name} must be 2D, got shape {:?}",
            view.shape()
        )));
    };

    // the file buffer isn't guaranteed to be 4-byte aligned
    let values = view
        .data()
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((values, width))
}
