//! Compilation errors.
//!
//! Every variant is fatal: the compiler never hands a partial IR to a
//! consumer.

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Type '{type_name}' has no primary key directive")]
    MissingPrimaryKey { type_name: String },

    #[error("Type '{type_name}' declares more than one primary key")]
    DuplicatePrimaryKey { type_name: String },

    #[error("Type '{type_name}': {context} references unknown field '{field}'")]
    UnknownField {
        type_name: String,
        field: String,
        context: String,
    },

    #[error("Type '{type_name}': {context} needs at least one partition field")]
    EmptyPartitionKey { type_name: String, context: String },

    #[error("Type '{type_name}': field '{field}' cannot be used in {context}: {reason}")]
    InvalidKeyField {
        type_name: String,
        field: String,
        context: String,
        reason: String,
    },

    #[error("Type '{type_name}' declares a {kind} without a name")]
    MissingIndexName { type_name: String, kind: String },

    #[error("Type '{type_name}' declares index '{index}' more than once")]
    DuplicateIndex { type_name: String, index: String },

    #[error("Type '{type_name}' declares lsi '{index}' but its primary key is not composite")]
    LsiRequiresCompositeKey { type_name: String, index: String },

    #[error("Field '{type_name}.{field}' has unknown type '{field_type}'")]
    UnknownFieldType {
        type_name: String,
        field: String,
        field_type: String,
    },

    #[error("Field '{type_name}.{field}' maps to reserved column '{column}'")]
    ReservedColumn {
        type_name: String,
        field: String,
        column: String,
    },

    #[error("Type '{type_name}' maps more than one attribute to column '{column}'")]
    DuplicateColumn { type_name: String, column: String },

    #[error("Field '{type_name}.{field}' declares more than one {directive} directive")]
    DuplicateFieldDirective {
        type_name: String,
        field: String,
        directive: String,
    },

    #[error("Type '{type_name}' declares more than one table directive")]
    DuplicateTableDirective { type_name: String },

    #[error("Type '{type_name}' declares more than one ttl field")]
    DuplicateTtl { type_name: String },

    #[error("TTL field '{type_name}.{field}' must be a Date")]
    TtlNotDate { type_name: String, field: String },

    #[error("TTL field '{type_name}.{field}' has no duration and does not accept caller values")]
    TtlWithoutSource { type_name: String, field: String },

    #[error("Handler '{handler}' on '{type_name}' targets unknown type '{target}'")]
    UnknownCdcTarget {
        type_name: String,
        handler: String,
        target: String,
    },

    #[error("Handler '{handler}' on '{type_name}': {kind} handlers cannot subscribe to {event}")]
    InvalidCdcEvent {
        type_name: String,
        handler: String,
        kind: String,
        event: String,
    },

    #[error("Handler '{handler}' is declared more than once on '{type_name}'")]
    DuplicateHandler { type_name: String, handler: String },

    #[error("Table '{table}': '{first}' and '{second}' disagree on whether the primary key is composite")]
    TableKeyShapeMismatch {
        table: String,
        first: String,
        second: String,
    },

    #[error("Table '{table}': index '{index}' differs in type or projection between '{first}' and '{second}'")]
    IndexShapeMismatch {
        table: String,
        index: String,
        first: String,
        second: String,
    },

    #[error("Table '{table}': '{first}' and '{second}' use different TTL columns")]
    TtlColumnMismatch {
        table: String,
        first: String,
        second: String,
    },

    #[error("Table '{table}' declares {count} {kind} indexes (limit {limit})")]
    TooManyIndexes {
        table: String,
        kind: String,
        count: usize,
        limit: usize,
    },
}
