use abllama_abstraction::{BackendError, ConfigError};
use thiserror::Error;

/// Errors raised while running generation.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("out of memory during generation: {0}")]
    ResourceExhaustion(String),

    #[error("invalid input: {0}")]
    Data(String),

    #[error(transparent)]
    Backend(BackendError),

    #[error("generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for GenerationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ModelLoad(message) => Self::ModelLoad(message),
            BackendError::ResourceExhausted(message) => Self::ResourceExhaustion(message),
            BackendError::Cancelled => Self::Cancelled,
            other => Self::Backend(other),
        }
    }
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;
