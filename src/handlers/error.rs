use crate::codec::CodecError;
use crate::repository::RepositoryError;
use crate::utils::retry::is_retryable;

pub type Result<T> = std::result::Result<T, HandlerError>;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Change record '{event_id}' has no image to handle")]
    MissingImage { event_id: String },

    #[error("No {kind} implementation registered for handler '{handler}'")]
    UnregisteredHandler { handler: String, kind: String },

    #[error("Handler '{handler}': source '{source_id}' matches neither the current nor the previous group")]
    BucketMismatch { handler: String, source_id: String },

    #[error("Failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Worth retrying from fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Repository(e) if is_retryable(e))
    }
}

impl From<CodecError> for HandlerError {
    fn from(e: CodecError) -> Self {
        Self::Repository(RepositoryError::InvalidInput(e))
    }
}
