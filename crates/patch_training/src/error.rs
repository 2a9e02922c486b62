//! Error type for the training core.

use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("model does not accept an auxiliary patch input")]
    PatchUnsupported,
    #[error("dataset has no batches: {0}")]
    EmptyDataset(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no checkpoint was saved under {0}")]
    NoCheckpoint(PathBuf),
    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("dataset error at {path}: {msg}")]
    Dataset { path: PathBuf, msg: String },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }
}
