//! High-level message store client built on a pluggable backend
//!
//! `MessageStore` owns the backend connection, routes reads by stream name,
//! maps expected-version rejections to [`MessageStoreError::VersionConflict`],
//! and tracks every subscription it creates so `shutdown` can stop them
//! before the connection is released.

use crate::backend::postgres::PostgresBackend;
use crate::backend::MessageStoreBackend;
use crate::config::{MessageStoreConfig, DEFAULT_BATCH_SIZE};
use crate::error::{MessageStoreError, Result};
use crate::projection::Projection;
use crate::stream::ReadTarget;
use crate::subscription::{Subscription, SubscriptionConfig};
use crate::types::{Message, NewMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Message store client
///
/// Cheap to clone; clones share the backend connection and the
/// subscription registry.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
}

/// Non-owning handle held by subscriptions
#[derive(Clone)]
pub(crate) struct WeakMessageStore {
    inner: Weak<StoreInner>,
}

impl WeakMessageStore {
    pub(crate) fn upgrade(&self) -> Option<MessageStore> {
        self.inner.upgrade().map(|inner| MessageStore { inner })
    }
}

struct StoreInner {
    backend: Box<dyn MessageStoreBackend>,

    /// Batch cap for `read_from_start` and `load_entity`
    batch_size: i64,

    /// Subscriptions created by this client, stopped on shutdown
    subscriptions: Mutex<Vec<Subscription>>,

    closed: AtomicBool,
}

impl MessageStore {
    /// Create a client from a backend
    pub fn new(backend: impl MessageStoreBackend + 'static) -> Self {
        Self::with_batch_size(backend, DEFAULT_BATCH_SIZE)
    }

    /// Create a client from a backend with a custom default batch size
    pub fn with_batch_size(backend: impl MessageStoreBackend + 'static, batch_size: i64) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                batch_size,
                subscriptions: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to a Message DB database
    pub async fn connect(config: MessageStoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = PostgresBackend::connect(&config).await?;
        Ok(Self::with_batch_size(backend, config.default_batch_size))
    }

    pub(crate) fn downgrade(&self) -> WeakMessageStore {
        WeakMessageStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Default batch cap used by `read_from_start` and `load_entity`
    pub fn batch_size(&self) -> i64 {
        self.inner.batch_size
    }

    /// Append a message to a stream, returning its position
    ///
    /// With `expected_version`, the write is rejected with
    /// [`MessageStoreError::VersionConflict`] unless the stream's last
    /// position equals it (-1 for a stream never written). Conflicts are
    /// never retried here.
    pub async fn write(
        &self,
        stream_name: &str,
        message: &NewMessage,
        expected_version: Option<i64>,
    ) -> Result<i64> {
        if message.message_type.trim().is_empty() {
            return Err(MessageStoreError::Validation(
                "Messages must have a type".to_string(),
            ));
        }

        let position = self
            .inner
            .backend
            .write_message(stream_name, message, expected_version)
            .await
            .map_err(|err| match (err.conflict_version(), expected_version) {
                (Some(actual), Some(expected)) => MessageStoreError::VersionConflict {
                    stream: stream_name.to_string(),
                    expected,
                    actual,
                },
                _ => MessageStoreError::Backend(err),
            })?;

        tracing::debug!(
            stream = %stream_name,
            message_type = %message.message_type,
            message_id = %message.id,
            position,
            "Message written"
        );

        Ok(position)
    }

    /// Read up to `max_messages` messages from a stream, starting at `from_position`
    ///
    /// `$all` reads every stream by global position; names containing the
    /// separator read one entity stream by stream position; any other name
    /// reads a whole category by global position.
    pub async fn read(
        &self,
        stream_name: &str,
        from_position: i64,
        max_messages: i64,
    ) -> Result<Vec<Message>> {
        let backend = &self.inner.backend;
        let messages = match ReadTarget::of(stream_name) {
            ReadTarget::All => backend.get_all_messages(from_position, max_messages).await?,
            ReadTarget::Entity(stream) => {
                backend
                    .get_stream_messages(stream, from_position, max_messages)
                    .await?
            }
            ReadTarget::Category(category) => {
                backend
                    .get_category_messages(category, from_position, max_messages)
                    .await?
            }
        };
        Ok(messages)
    }

    /// Read from the start of a stream, capped at the default batch size
    pub async fn read_from_start(&self, stream_name: &str) -> Result<Vec<Message>> {
        self.read(stream_name, 0, self.inner.batch_size).await
    }

    /// Read the last message of a stream, or `None` if it was never written
    pub async fn read_last(&self, stream_name: &str) -> Result<Option<Message>> {
        Ok(self
            .inner
            .backend
            .get_last_stream_message(stream_name)
            .await?)
    }

    /// Fold a stream's full history through a projection
    ///
    /// Reads batch after batch until the stream is exhausted, so histories
    /// longer than the batch size are folded completely.
    pub async fn load_entity<P>(&self, stream_name: &str, projection: &P) -> Result<P::State>
    where
        P: Projection + ?Sized,
    {
        let target = ReadTarget::of(stream_name);
        let batch_size = self.inner.batch_size;
        let mut cursor = target.initial_cursor();
        let mut state = projection.init();

        loop {
            let batch = self.read(stream_name, cursor + 1, batch_size).await?;
            let exhausted = (batch.len() as i64) < batch_size;

            for message in &batch {
                cursor = target.cursor_of(message);
                state = projection.apply(state, message);
            }

            if exhausted || batch.is_empty() {
                break;
            }
        }

        Ok(state)
    }

    /// Create and register a subscription
    ///
    /// The subscription is stopped by [`MessageStore::shutdown`]; it does not
    /// start polling until [`Subscription::start`] is called.
    pub async fn create_subscription(&self, config: SubscriptionConfig) -> Result<Subscription> {
        config.validate()?;

        let subscription = Subscription::new(self, config);
        self.inner
            .subscriptions
            .lock()
            .await
            .push(subscription.clone());

        tracing::info!(
            subscriber = %subscription.subscriber_id(),
            stream = %subscription.stream_name(),
            "Subscription created"
        );

        Ok(subscription)
    }

    /// Subscriptions registered with this client
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.lock().await.clone()
    }

    /// Stop every subscription, then release the backend connection
    ///
    /// Each subscription finishes its in-flight tick before the connection is
    /// closed. Once the backend has closed successfully, calling this again
    /// is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock().await);
        futures::future::join_all(subscriptions.iter().map(|s| s.stop())).await;

        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Only a successful close is final; a failed one can be retried
        self.inner.backend.close().await?;
        self.inner.closed.store(true, Ordering::SeqCst);
        tracing::info!(
            backend = %self.backend_name(),
            subscriptions = subscriptions.len(),
            "Message store shut down"
        );
        Ok(())
    }
}
