use crate::codec::CodecError;
use crate::key::KeyError;
use crate::storage::StoreError;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Outcome taxonomy of every repository operation.
///
/// Callers branch on these: conflicts, absence, and integrity violations are
/// never folded into one generic failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{model} '{id}' already exists")]
    AlreadyExists { model: String, id: String },

    #[error("{model} '{id}' not found")]
    NotFound { model: String, id: String },

    #[error("{model} '{id}' was modified concurrently: expected version {expected:?}, found {actual:?}")]
    OptimisticLocking {
        model: String,
        id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    #[error("Data integrity violation reading {model}: {reason}")]
    DataIntegrity { model: String, reason: String },

    #[error("{model} does not support {operation}")]
    UnsupportedOperation { model: String, operation: String },

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CodecError),

    #[error("Unexpected store error: {0}")]
    UnexpectedStore(#[from] StoreError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RepositoryError {
    /// A concurrent writer got there first; re-deriving from current state
    /// and retrying may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::OptimisticLocking { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<KeyError> for RepositoryError {
    fn from(error: KeyError) -> Self {
        Self::InvalidInput(CodecError::Key(error))
    }
}
