//! Schema and enveloping error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    /// No schema has been registered under the subject
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// Schema text is not valid JSON or not a valid JSON schema
    #[error("Invalid schema for subject {subject}: {reason}")]
    InvalidSchema { subject: String, reason: String },

    /// Payload failed validation against the topic's schema
    #[error("Payload rejected by schema: {0}")]
    ValidationFailed(String),

    /// Schema registry transport failure
    #[error("Schema registry error: {0}")]
    Registry(String),
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, SchemaError>;
