use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("graph extraction failed: {0}")]
    GraphExtraction(String),

    #[error("invalid graph '{graph}': {reason}")]
    InvalidGraph { graph: String, reason: String },

    #[error("no calibration .npy files found in {}", .0.display())]
    NoCalibrationData(PathBuf),

    #[error("unexpected shape {shape:?} in {}: {reason}", path.display())]
    UnexpectedShape { path: PathBuf, shape: Vec<usize>, reason: String },

    #[error("reference output has shape {reference:?} but split pipeline produced {split:?}")]
    OutputMismatch { reference: Vec<usize>, split: Vec<usize> },

    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed graph file {}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read calibration sample {}", path.display())]
    CalibrationRead {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("pipeline stage '{0}' ran before its inputs were produced")]
    StageOrder(String),

    /// Executor or device compiler failure, passed through untouched.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }

    pub fn invalid(graph: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidGraph { graph: graph.to_string(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
