//! Error types for a3s-message-store

use crate::backend::BackendError;
use thiserror::Error;

/// Errors that can occur in the message store client
#[derive(Debug, Error)]
pub enum MessageStoreError {
    /// Local validation failure, never sent to the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stream advanced past the version the writer expected
    #[error(
        "StreamVersionConflictError - stream: {stream} - expected version: {expected} actual version: {actual}"
    )]
    VersionConflict {
        stream: String,
        expected: i64,
        actual: i64,
    },

    /// Any backend failure not mapped to a more specific variant
    #[error(transparent)]
    Backend(BackendError),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A subscription handler returned an error
    #[error("Handler for message type '{message_type}' failed: {reason}")]
    Handler {
        message_type: String,
        reason: String,
    },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid subscription lifecycle use
    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl MessageStoreError {
    /// Build a handler failure from any displayable reason
    pub fn handler(message_type: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            message_type: message_type.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is a stream version conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<BackendError> for MessageStoreError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

/// Result type alias for message store operations
pub type Result<T> = std::result::Result<T, MessageStoreError>;
