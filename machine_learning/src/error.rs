use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    NonFinite {
        what: &'static str,
    },
    InvalidLabel {
        label: f32,
        classes: usize,
    },
    InvalidConfig(String),
    EmptyDataset,
    NoForwardPass,
    Shape(ShapeError),
    Tensors(SafeTensorError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::NonFinite { what } => write!(f, "The {what} contain non-finite values"),
            MlErr::InvalidLabel { label, classes } => write!(
                f,
                "The label {label} is not a class index in 0..{classes} nor the ignore index"
            ),
            MlErr::InvalidConfig(detail) => write!(f, "Invalid configuration: {detail}"),
            MlErr::EmptyDataset => write!(f, "The dataset has no usable samples"),
            MlErr::NoForwardPass => write!(
                f,
                "Tried to run a backward pass without a forward pass in training mode"
            ),
            MlErr::Shape(e) => write!(f, "Shape error: {e}"),
            MlErr::Tensors(e) => write!(f, "Tensor file error: {e}"),
            MlErr::Io(e) => write!(f, "Io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Tensors(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Tensors(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
