use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

use crate::initialization::RandErr;

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
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingForwardPass {
        layer: &'static str,
    },
    ParamGenExhausted {
        got: usize,
        expected: usize,
    },
    InvalidLayer(String),
    Shape(ShapeError),
    Rand(RandErr),
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
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::MissingForwardPass { layer } => write!(
                f,
                "Tried to backpropagate through a {layer} layer without a previous forward pass"
            ),
            MlErr::ParamGenExhausted { got, expected } => write!(
                f,
                "The parameter generator got exhausted after {got} of the expected {expected} parameters"
            ),
            MlErr::InvalidLayer(detail) => write!(f, "Invalid layer: {detail}"),
            MlErr::Shape(e) => write!(f, "Failed to reshape an array: {e}"),
            MlErr::Rand(e) => write!(f, "Failed to build a random parameter generator: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Rand(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Rand(value)
    }
}
