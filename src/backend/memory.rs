//! In-memory backend
//!
//! Keeps every message in process memory with the same ordering, position
//! and expected-version semantics as the Postgres backend. Intended for
//! tests and single-process use; nothing survives a restart.

use super::{version_conflict_message, BackendError, BackendResult, MessageStoreBackend};
use crate::stream;
use crate::types::{Message, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    /// All messages in global order; index `i` holds global position `i + 1`
    messages: Vec<Message>,
    /// Stream name → indexes into `messages`, in stream order
    streams: HashMap<String, Vec<usize>>,
    ids: HashSet<Uuid>,
}

/// In-memory message store backend
///
/// Cloning shares the underlying store, so a test can keep a handle to the
/// same data a client owns.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of messages written
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.is_closed() {
            return Err(BackendError::connection("Connection terminated: backend is closed"));
        }
        Ok(())
    }
}

fn take(limit: i64) -> usize {
    if limit < 0 {
        usize::MAX
    } else {
        limit as usize
    }
}

#[async_trait]
impl MessageStoreBackend for MemoryBackend {
    async fn write_message(
        &self,
        stream_name: &str,
        message: &NewMessage,
        expected_version: Option<i64>,
    ) -> BackendResult<i64> {
        self.ensure_open()?;
        let mut state = self.state.write().await;

        let version = state
            .streams
            .get(stream_name)
            .map_or(-1, |indexes| indexes.len() as i64 - 1);

        if let Some(expected) = expected_version {
            if expected != version {
                return Err(BackendError::version_conflict(
                    version,
                    version_conflict_message(stream_name, expected, version),
                ));
            }
        }

        if !state.ids.insert(message.id) {
            return Err(BackendError::query(format!(
                "duplicate key value violates unique constraint \"messages_id\": {}",
                message.id
            )));
        }

        let position = version + 1;
        let index = state.messages.len();
        state.messages.push(Message {
            id: message.id,
            message_type: message.message_type.clone(),
            stream_name: stream_name.to_string(),
            position,
            global_position: index as i64 + 1,
            data: message.data.clone(),
            metadata: match &message.metadata {
                Some(Value::Null) | None => Value::Object(Map::new()),
                Some(metadata) => metadata.clone(),
            },
            time: Utc::now(),
        });
        state
            .streams
            .entry(stream_name.to_string())
            .or_default()
            .push(index);

        Ok(position)
    }

    async fn get_stream_messages(
        &self,
        stream_name: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let Some(indexes) = state.streams.get(stream_name) else {
            return Ok(Vec::new());
        };

        Ok(indexes
            .iter()
            .map(|&i| &state.messages[i])
            .filter(|m| m.position >= from_position)
            .take(take(limit))
            .cloned()
            .collect())
    }

    async fn get_category_messages(
        &self,
        category: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        Ok(state
            .messages
            .iter()
            .filter(|m| m.global_position >= from_position)
            .filter(|m| stream::category(&m.stream_name) == category)
            .take(take(limit))
            .cloned()
            .collect())
    }

    async fn get_all_messages(
        &self,
        from_global_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let start = (from_global_position.max(1) - 1) as usize;
        Ok(state
            .messages
            .iter()
            .skip(start)
            .take(take(limit))
            .cloned()
            .collect())
    }

    async fn get_last_stream_message(&self, stream_name: &str) -> BackendResult<Option<Message>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        Ok(state
            .streams
            .get(stream_name)
            .and_then(|indexes| indexes.last())
            .map(|&i| state.messages[i].clone()))
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
