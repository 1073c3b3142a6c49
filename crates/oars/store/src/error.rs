use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for oars_types::OarsError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => oars_types::OarsError::NotFound(msg),
            StoreError::Conflict(msg) => oars_types::OarsError::Conflict(msg),
            StoreError::InvalidInput(msg) => oars_types::OarsError::Validation(msg),
            StoreError::Serialization(msg) | StoreError::Backend(msg) => {
                oars_types::OarsError::Internal(msg)
            }
        }
    }
}
