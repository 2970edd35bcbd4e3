use thiserror::Error;

/// A document or field definition that does not fit the schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("Field '{0}' is defined more than once")]
    DuplicateField(String),

    #[error("Invalid options for field '{field}': {reason}")]
    InvalidOptionCombination { field: String, reason: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Type mismatch on field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Field '{0}' is present but carries no value")]
    MissingRequiredValue(String),

    #[error("Invalid facet path '{0}'")]
    InvalidFacetPath(String),
}

/// A rejected query string
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown field in query: {0}")]
    UnknownField(String),

    #[error("Type mismatch on field '{field}': {reason}")]
    TypeMismatch { field: String, reason: String },
}

/// Main error type for Loupe operations
#[derive(Error, Debug)]
pub enum LoupeError {
    #[error("Schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("An index writer is already open on this index")]
    WriterBusy,

    #[error("The index writer has been closed")]
    WriterClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt segment {segment}: {reason}")]
    CorruptSegment { segment: String, reason: String },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Loupe operations
pub type Result<T> = std::result::Result<T, LoupeError>;

impl LoupeError {
    pub(crate) fn corrupt_segment(segment: impl ToString, reason: impl Into<String>) -> Self {
        LoupeError::CorruptSegment {
            segment: segment.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a transient failure the caller could retry.
    ///
    /// The engine never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LoupeError::WriterBusy | LoupeError::Io(_))
    }

    /// Whether the error was caused by input that does not fit the schema
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, LoupeError::SchemaViolation(_))
    }
}
