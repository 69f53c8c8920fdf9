use std::{error::Error, fmt, io, process::ExitStatus};

use collective::CollectiveErr;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Json(serde_json::Error),
    Collective(CollectiveErr),
    InvalidConfig(String),
    InvalidDataset(String),
    /// Resuming from a checkpoint was requested, which isn't supported.
    ResumeUnsupported,
    DeviceUnavailable {
        rank: usize,
        available: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    GradInEvalMode,
    MalformedVerdict {
        got: usize,
    },
    Checkpoint(String),
    WorkerFailed {
        rank: usize,
        status: ExitStatus,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::Collective(e) => write!(f, "collective error: {e}"),
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::InvalidDataset(msg) => write!(f, "invalid dataset: {msg}"),
            TrainErr::ResumeUnsupported => {
                write!(f, "resuming from a checkpoint is not supported")
            }
            TrainErr::DeviceUnavailable { rank, available } => write!(
                f,
                "rank {rank} has no device to bind, only {available} available"
            ),
            TrainErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got}, expected {expected}"),
            TrainErr::GradInEvalMode => {
                write!(f, "backward pass requested while the model is in eval mode")
            }
            TrainErr::MalformedVerdict { got } => {
                write!(f, "received a verdict of {got} values from the coordinator")
            }
            TrainErr::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            TrainErr::WorkerFailed { rank, status } => {
                write!(f, "worker {rank} exited with {status}")
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Collective(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<CollectiveErr> for TrainErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}

impl From<safetensors::SafeTensorError> for TrainErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
