use crate::key::KeyError;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("{model}.{field} is required")]
    MissingField { model: String, field: String },

    #[error("{model}.{field}: {reason}")]
    InvalidValue {
        model: String,
        field: String,
        reason: String,
    },

    #[error("Expected an item of type '{expected}', found {actual:?}")]
    TypeMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("{model}.{field} expiry cannot be set by callers")]
    TtlOverrideNotAllowed { model: String, field: String },

    #[error("{model}.{field} expiry must be supplied")]
    TtlOverrideRequired { model: String, field: String },

    #[error("{model}.{field} expiry is out of range")]
    TtlOutOfRange { model: String, field: String },

    #[error("{model}.{field} needs compute function '{function}', which is not registered")]
    MissingComputeFunction {
        model: String,
        field: String,
        function: String,
    },

    #[error(transparent)]
    Key(#[from] KeyError),
}
