use abllama_abstraction::{BackendError, ConfigError};
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dataset error: {0}")]
    Data(String),

    #[error("out of memory at batch size {batch_size}: {message}")]
    ResourceExhaustion { batch_size: usize, message: String },

    #[error(transparent)]
    Backend(BackendError),

    #[error("training cancelled")]
    Cancelled,

    #[error("invalid orchestrator state: {0}")]
    State(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl From<BackendError> for TrainingError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => Self::Cancelled,
            other => Self::Backend(other),
        }
    }
}
