//! Core message types for the a3s-message-store client
//!
//! All types use camelCase JSON serialization for wire compatibility with
//! Message DB metadata conventions.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata key carrying the request-scoped trace identifier
pub const TRACE_ID: &str = "traceId";
/// Metadata key carrying the acting user
pub const USER_ID: &str = "userId";
/// Metadata key naming the stream a causal chain originated from
pub const ORIGIN_STREAM_NAME: &str = "originStreamName";
/// Metadata key naming the stream of the message that caused this one
pub const CAUSATION_STREAM_NAME: &str = "causationMessageStreamName";
/// Metadata key carrying the global position of the causing message
pub const CAUSATION_GLOBAL_POSITION: &str = "causationMessageGlobalPosition";

/// A message as stored in, and read back from, the message store
///
/// Messages are immutable: they are created only by a write and never
/// mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier
    pub id: Uuid,

    /// Message type (e.g., "UrlCreated")
    #[serde(rename = "type")]
    pub message_type: String,

    /// Stream this message was written to
    pub stream_name: String,

    /// Sequence number within its own stream, starting at 0
    pub position: i64,

    /// Store-wide sequence number, starting at 1
    pub global_position: i64,

    /// Message payload
    pub data: Value,

    /// Message metadata; an empty object when none was written
    pub metadata: Value,

    /// Time the message was written
    pub time: DateTime<Utc>,
}

impl Message {
    /// Decode the payload into a typed structure
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Decode the metadata into a typed structure
    pub fn metadata_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.metadata.clone())?)
    }

    /// Look up a string metadata entry
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Trace identifier carried in metadata, if any
    pub fn trace_id(&self) -> Option<&str> {
        self.metadata_str(TRACE_ID)
    }

    /// Origin stream name carried in metadata, if any
    pub fn origin_stream_name(&self) -> Option<&str> {
        self.metadata_str(ORIGIN_STREAM_NAME)
    }

    /// Category of the stream this message belongs to
    pub fn category(&self) -> &str {
        crate::stream::category(&self.stream_name)
    }
}

/// A message ready to be written
///
/// Produced by [`NewMessage::new`], which assigns a fresh identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Message identifier (random v4 unless supplied)
    pub id: Uuid,

    /// Message type; must be non-empty to be written
    #[serde(rename = "type")]
    pub message_type: String,

    /// Message payload
    pub data: Value,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NewMessage {
    /// Create a message with a fresh identifier and no metadata
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            data,
            metadata: None,
        }
    }

    /// Create a message that continues the causal chain of `previous`
    ///
    /// Copies `traceId` and `userId`, records the causing stream and global
    /// position, and carries `originStreamName` forward (defaulting to the
    /// causing message's own stream).
    pub fn follow(previous: &Message, message_type: impl Into<String>, data: Value) -> Self {
        let mut metadata = Map::new();
        for key in [TRACE_ID, USER_ID] {
            if let Some(value) = previous.metadata.get(key) {
                metadata.insert(key.to_string(), value.clone());
            }
        }

        let origin = previous
            .origin_stream_name()
            .unwrap_or(&previous.stream_name)
            .to_string();
        metadata.insert(ORIGIN_STREAM_NAME.to_string(), Value::String(origin));
        metadata.insert(
            CAUSATION_STREAM_NAME.to_string(),
            Value::String(previous.stream_name.clone()),
        );
        metadata.insert(
            CAUSATION_GLOBAL_POSITION.to_string(),
            Value::from(previous.global_position),
        );

        Self::new(message_type, data).with_metadata(Value::Object(metadata))
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Add a single metadata entry, creating the metadata object if needed
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let metadata = self
            .metadata
            .get_or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = metadata {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Use an explicit identifier instead of the generated one
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}
