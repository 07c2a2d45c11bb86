//! Error types for the Tandem engine.

use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("relationship mapping '{0}' is CUSTOM but has no converter")]
    MissingConverter(String),

    #[error("relationship mapping '{0}' holds nested resources but is SINGLE")]
    NestedSingle(String),

    // Value errors
    #[error("invalid value for relationship '{field}': {reason}")]
    InvalidRelationshipValue { field: String, reason: String },

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("invalid operation path: {0}")]
    InvalidPath(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
