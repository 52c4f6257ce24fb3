use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use machine_learning::MlErr;
use safetensors::SafeTensorError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, GanErr>;

/// All errors that can occur while preparing data, training or persisting models.
#[derive(Debug)]
pub enum GanErr {
    /// Reading or writing a file failed.
    Io { path: PathBuf, source: io::Error },
    /// A source image couldn't be decoded, or a preview couldn't be encoded.
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// The source image directory has no images.
    EmptyDataset { path: PathBuf },
    /// A cached tensor doesn't have the expected dtype or shape.
    CacheShapeMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
    /// An in-memory tensor doesn't have the shape an operation needs.
    ShapeMismatch {
        what: &'static str,
        found: Vec<usize>,
        expected: String,
    },
    /// A tensor in a saved model file doesn't have the expected dtype.
    TensorMismatch {
        path: PathBuf,
        name: String,
        found: String,
        expected: String,
    },
    /// Invalid configuration, caught before training.
    InvalidConfig(String),
    /// A tensor file is missing a required tensor or metadata entry.
    MissingTensor { path: PathBuf, name: String },
    /// A trainer was stepped after it finished its run.
    TrainingFinished,
    ThreadPool(rayon::ThreadPoolBuildError),
    Safetensors(SafeTensorError),
    Json(serde_json::Error),
    Ml(MlErr),
}

impl GanErr {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

impl Display for GanErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "io error on {}: {source}", path.display()),
            Self::Image { path, source } => {
                write!(f, "image error on {}: {source}", path.display())
            }
            Self::EmptyDataset { path } => {
                write!(f, "no training images found in {}", path.display())
            }
            Self::CacheShapeMismatch {
                path,
                found,
                expected,
            } => write!(
                f,
                "cached tensor {} is {found}, expected {expected}",
                path.display()
            ),
            Self::ShapeMismatch {
                what,
                found,
                expected,
            } => write!(f, "{what} have shape {found:?}, expected {expected}"),
            Self::TensorMismatch {
                path,
                name,
                found,
                expected,
            } => write!(
                f,
                "tensor {name} in {} is {found}, expected {expected}",
                path.display()
            ),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::MissingTensor { path, name } => {
                write!(f, "{} has no entry named {name}", path.display())
            }
            Self::TrainingFinished => write!(f, "the trainer already finished its run"),
            Self::ThreadPool(e) => write!(f, "failed to build the thread pool: {e}"),
            Self::Safetensors(e) => write!(f, "safetensors error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for GanErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Image { source, .. } => Some(source),
            Self::ThreadPool(e) => Some(e),
            Self::Safetensors(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for GanErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ndarray::ShapeError> for GanErr {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Ml(MlErr::Shape(e))
    }
}

impl From<SafeTensorError> for GanErr {
    fn from(e: SafeTensorError) -> Self {
        Self::Safetensors(e)
    }
}

impl From<serde_json::Error> for GanErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for GanErr {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e)
    }
}
