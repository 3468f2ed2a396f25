//! Backend adapter trait, the call surface to the underlying store
//!
//! Backends expose the store's append/read functions and translate their
//! failures into [`BackendError`]. They carry no logic beyond request and
//! response shaping; stream routing, validation and conflict mapping live
//! in the client.

use crate::types::{Message, NewMessage};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

pub mod memory;
pub mod postgres;

/// Pattern of the backend's wrong-expected-version exception text
///
/// The backend raises
/// `Wrong expected version: <expected> (Stream: <name>, Stream Version: <actual>)`;
/// the text must keep this shape for conflicts to be recognised.
pub const VERSION_CONFLICT_PATTERN: &str = r"^Wrong.*Stream Version: (-?\d+)\)";

/// Result type alias for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Core trait for message store backends
///
/// Mirrors the backend's functions one to one. Implementations must return
/// rows ordered ascending and never fail on "no messages".
#[async_trait]
pub trait MessageStoreBackend: Send + Sync {
    /// Append a message, returning its position in the stream
    ///
    /// With `expected_version`, the append only succeeds if the stream's
    /// current version (last position, -1 when empty) equals it.
    async fn write_message(
        &self,
        stream_name: &str,
        message: &NewMessage,
        expected_version: Option<i64>,
    ) -> BackendResult<i64>;

    /// Read one entity stream from a stream position
    async fn get_stream_messages(
        &self,
        stream_name: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>>;

    /// Read every stream of a category from a global position
    async fn get_category_messages(
        &self,
        category: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>>;

    /// Read every stream in the store from a global position
    async fn get_all_messages(
        &self,
        from_global_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>>;

    /// Read the highest-position message of a stream
    async fn get_last_stream_message(&self, stream_name: &str) -> BackendResult<Option<Message>>;

    /// Release the backend connection
    ///
    /// Default implementation has nothing to release.
    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Backend name (e.g., "postgres", "memory")
    fn name(&self) -> &str;
}

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Expected version did not match; carries the stream's actual version
    WrongExpectedVersion { actual: i64 },
    /// Connection could not be established or was lost
    Connection,
    /// Query execution failure
    Query,
    /// A row could not be decoded into a message
    Decode,
}

/// A failure reported by a backend
///
/// Displays as the backend's own message so unmapped failures surface
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    /// Create an error of the given kind
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A structured wrong-expected-version rejection
    pub fn version_conflict(actual: i64, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::WrongExpectedVersion { actual }, message)
    }

    /// A connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    /// A query failure
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Query, message)
    }

    /// A row decoding failure
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Decode, message)
    }

    /// Classify a free-text query failure
    ///
    /// Compatibility shim for backends that only report conflicts as text:
    /// messages matching [`VERSION_CONFLICT_PATTERN`] become
    /// [`BackendErrorKind::WrongExpectedVersion`], anything else is a plain
    /// query failure.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match parse_version_conflict(&message) {
            Some(actual) => Self::version_conflict(actual, message),
            None => Self::query(message),
        }
    }

    /// Error classification
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Backend's message text
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Actual stream version when this is a version conflict
    pub fn conflict_version(&self) -> Option<i64> {
        match self.kind {
            BackendErrorKind::WrongExpectedVersion { actual } => Some(actual),
            _ => None,
        }
    }
}

/// Extract the actual stream version from a conflict message
pub fn parse_version_conflict(message: &str) -> Option<i64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(VERSION_CONFLICT_PATTERN).expect("version conflict pattern is valid")
    });

    pattern
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Conflict message text in the backend's format
pub(crate) fn version_conflict_message(stream_name: &str, expected: i64, actual: i64) -> String {
    format!(
        "Wrong expected version: {} (Stream: {}, Stream Version: {})",
        expected, stream_name, actual
    )
}
