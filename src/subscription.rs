//! Checkpointed polling subscriptions
//!
//! A subscription repeatedly reads the next batch of a stream, hands each
//! message to its handler strictly in order, and periodically records how far
//! it got in a checkpoint stream of its own (`subscriberPosition-<id>`).
//! Restarting resumes from the last checkpoint, so up to
//! `position_update_interval - 1` already-handled messages may be delivered
//! again: handlers must tolerate replays.
//!
//! Stopping is cooperative. `stop` raises a flag checked at the top of every
//! tick and resolves once the loop has exited; a handler in flight is always
//! allowed to finish.

use crate::client::{MessageStore, WeakMessageStore};
use crate::error::{MessageStoreError, Result};
use crate::stream::{self, ReadTarget};
use crate::types::{Message, NewMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default number of messages read per tick
pub const DEFAULT_MESSAGES_PER_TICK: i64 = 100;
/// Default number of handled messages between checkpoint writes
pub const DEFAULT_POSITION_UPDATE_INTERVAL: u64 = 100;
/// Default idle backoff between empty ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Type of the messages written to checkpoint streams
pub const CHECKPOINT_MESSAGE_TYPE: &str = "Read";

/// Async handler for one kind of message
///
/// Implemented for any `Fn(Message) -> impl Future<Output = Result<()>>`
/// closure, so handlers can be written inline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message; an error stops the subscription
    async fn handle(&self, message: Message) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<()> {
        (self)(message).await
    }
}

/// Handlers keyed by message type, with an optional catch-all
#[derive(Clone, Default)]
pub struct Handlers {
    by_type: HashMap<String, Arc<dyn MessageHandler>>,
    any: Option<Arc<dyn MessageHandler>>,
}

impl Handlers {
    /// Create an empty handler set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a message type
    pub fn on(mut self, message_type: impl Into<String>, handler: impl MessageHandler + 'static) -> Self {
        self.by_type.insert(message_type.into(), Arc::new(handler));
        self
    }

    /// Register the handler used for types without a specific handler
    pub fn on_any(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.any = Some(Arc::new(handler));
        self
    }

    /// Handler for a message type: the exact match, else the catch-all
    pub fn get(&self, message_type: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.by_type.get(message_type).or(self.any.as_ref())
    }

    /// Whether no handler at all is registered
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.any.is_none()
    }
}

/// Subscription settings
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Stream, category, or `$all` to poll
    pub stream_name: String,

    /// Identifies the subscriber and names its checkpoint stream
    ///
    /// Two subscriptions with the same id must never run at the same time.
    pub subscriber_id: String,

    /// Handlers keyed by message type
    pub handlers: Handlers,

    /// Messages read per tick (default: 100)
    pub messages_per_tick: i64,

    /// Handled messages between checkpoint writes (default: 100)
    pub position_update_interval: u64,

    /// Only deliver messages whose `originStreamName` metadata belongs to this category
    pub origin_stream_name: Option<String>,

    /// Sleep after a tick that delivered nothing (default: 100ms)
    pub tick_interval: Duration,

    /// Upper bound on a single handler invocation; expiry stops the subscription
    pub handler_timeout: Option<Duration>,
}

impl SubscriptionConfig {
    /// Create a config with default batching, checkpointing and backoff
    pub fn new(
        stream_name: impl Into<String>,
        subscriber_id: impl Into<String>,
        handlers: Handlers,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            subscriber_id: subscriber_id.into(),
            handlers,
            messages_per_tick: DEFAULT_MESSAGES_PER_TICK,
            position_update_interval: DEFAULT_POSITION_UPDATE_INTERVAL,
            origin_stream_name: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            handler_timeout: None,
        }
    }

    pub fn with_messages_per_tick(mut self, messages_per_tick: i64) -> Self {
        self.messages_per_tick = messages_per_tick;
        self
    }

    pub fn with_position_update_interval(mut self, interval: u64) -> Self {
        self.position_update_interval = interval;
        self
    }

    pub fn with_origin_stream_name(mut self, origin_stream_name: impl Into<String>) -> Self {
        self.origin_stream_name = Some(origin_stream_name.into());
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(MessageStoreError::Validation(
                "Subscription stream name must not be empty".to_string(),
            ));
        }
        if self.subscriber_id.is_empty() {
            return Err(MessageStoreError::Validation(
                "Subscriber id must not be empty".to_string(),
            ));
        }
        if self.messages_per_tick <= 0 {
            return Err(MessageStoreError::Validation(format!(
                "messagesPerTick must be positive, got {}",
                self.messages_per_tick
            )));
        }
        if self.position_update_interval == 0 {
            return Err(MessageStoreError::Validation(
                "positionUpdateInterval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not polling (initial and terminal)
    Stopped,
    /// Poll loop is active
    Running,
}

/// Why a subscription's poll loop exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop` was called
    Requested,
    /// Fetching or handling a batch failed
    Failed(String),
}

#[derive(Debug, Clone)]
struct Status {
    state: SubscriptionState,
    reason: Option<StopReason>,
}

/// Payload of checkpoint messages
#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    position: i64,
}

/// Read cursor owned by one running poll loop
#[derive(Debug)]
struct Cursor {
    position: i64,
    /// Handled messages since the last checkpoint write
    pending: u64,
}

impl Cursor {
    /// Move past a message that was not delivered
    fn skip(&mut self, position: i64) {
        self.position = self.position.max(position);
    }

    /// Record a handled message; returns true when a checkpoint is due
    fn advance(&mut self, position: i64, interval: u64) -> bool {
        self.skip(position);
        self.pending += 1;
        if self.pending >= interval {
            self.pending = 0;
            true
        } else {
            false
        }
    }
}

/// Handle to a polling subscription
///
/// Cheap to clone; clones control the same poll loop.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    /// Weak so a client dropped without `shutdown` is still freed
    store: WeakMessageStore,
    config: SubscriptionConfig,
    checkpoint_stream: String,
    cancel: watch::Sender<bool>,
    status: watch::Sender<Status>,
}

impl Subscription {
    pub(crate) fn new(store: &MessageStore, config: SubscriptionConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        let (status, _) = watch::channel(Status {
            state: SubscriptionState::Stopped,
            reason: None,
        });

        Self {
            inner: Arc::new(SubscriptionInner {
                checkpoint_stream: stream::checkpoint_stream(&config.subscriber_id),
                store: store.downgrade(),
                config,
                cancel,
                status,
            }),
        }
    }

    /// Subscriber id
    pub fn subscriber_id(&self) -> &str {
        &self.inner.config.subscriber_id
    }

    /// Stream being polled
    pub fn stream_name(&self) -> &str {
        &self.inner.config.stream_name
    }

    /// Name of this subscriber's checkpoint stream
    pub fn checkpoint_stream(&self) -> &str {
        &self.inner.checkpoint_stream
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.inner.status.borrow().state
    }

    /// Whether the poll loop is active
    pub fn is_running(&self) -> bool {
        self.state() == SubscriptionState::Running
    }

    /// Why the last run ended, if it has ended
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.status.borrow().reason.clone()
    }

    /// Start polling on the current tokio runtime
    ///
    /// Fails if the subscription is already running.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(self.already_running());
        }
        // Cleared before publishing Running so a concurrent stop is never lost
        self.inner.cancel.send_replace(false);

        let started = self.inner.status.send_if_modified(|status| {
            if status.state == SubscriptionState::Running {
                return false;
            }
            status.state = SubscriptionState::Running;
            status.reason = None;
            true
        });

        if !started {
            return Err(self.already_running());
        }

        tokio::spawn(Arc::clone(&self.inner).run());
        Ok(())
    }

    fn already_running(&self) -> MessageStoreError {
        MessageStoreError::Subscription(format!(
            "Subscription '{}' is already running",
            self.subscriber_id()
        ))
    }

    /// Request the poll loop to stop and wait until it has exited
    ///
    /// Safe to call repeatedly and from several tasks; every caller resolves
    /// once the loop is gone. Returns immediately if not running.
    pub async fn stop(&self) {
        self.inner.cancel.send_replace(true);
        self.stopped().await;
    }

    /// Wait until the poll loop exits, without requesting it to
    ///
    /// Returns why it exited (`None` if it was never started).
    pub async fn stopped(&self) -> Option<StopReason> {
        let mut status = self.inner.status.subscribe();
        loop {
            {
                let current = status.borrow_and_update();
                if current.state == SubscriptionState::Stopped {
                    return current.reason.clone();
                }
            }
            if status.changed().await.is_err() {
                return self.stop_reason();
            }
        }
    }
}

impl SubscriptionInner {
    async fn run(self: Arc<Self>) {
        tracing::info!(
            subscriber = %self.config.subscriber_id,
            stream = %self.config.stream_name,
            "Subscription started"
        );

        let reason = match self.poll().await {
            Ok(()) => StopReason::Requested,
            Err(e) => {
                tracing::error!(
                    subscriber = %self.config.subscriber_id,
                    stream = %self.config.stream_name,
                    error = %e,
                    "Error processing batch"
                );
                StopReason::Failed(e.to_string())
            }
        };

        tracing::info!(
            subscriber = %self.config.subscriber_id,
            reason = ?reason,
            "Subscription stopped"
        );

        self.status.send_modify(|status| {
            status.state = SubscriptionState::Stopped;
            status.reason = Some(reason);
        });
    }

    fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
        *cancel.borrow()
    }

    /// Strong handle to the client, held only for the duration of one step
    fn store(&self) -> Result<MessageStore> {
        self.store.upgrade().ok_or_else(|| {
            MessageStoreError::Subscription("Message store was dropped".to_string())
        })
    }

    async fn poll(&self) -> Result<()> {
        let target = ReadTarget::of(&self.config.stream_name);
        let mut cancel = self.cancel.subscribe();
        let mut cursor = Cursor {
            position: self.load_position(&self.store()?, target).await?,
            pending: 0,
        };

        while !Self::is_cancelled(&cancel) {
            let delivered = self.tick(&self.store()?, target, &mut cursor).await?;

            if delivered == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.tick_interval) => {}
                    _ = cancel.changed() => {}
                }
            }
        }

        Ok(())
    }

    /// Read the resume position from the checkpoint stream
    async fn load_position(&self, store: &MessageStore, target: ReadTarget<'_>) -> Result<i64> {
        let position = match store.read_last(&self.checkpoint_stream).await? {
            Some(message) => message.data_as::<Checkpoint>()?.position,
            None => target.initial_cursor(),
        };

        tracing::debug!(
            subscriber = %self.config.subscriber_id,
            position,
            "Subscription position loaded"
        );
        Ok(position)
    }

    async fn write_position(&self, store: &MessageStore, position: i64) -> Result<()> {
        let checkpoint = NewMessage::new(
            CHECKPOINT_MESSAGE_TYPE,
            serde_json::to_value(Checkpoint { position })?,
        );
        store
            .write(&self.checkpoint_stream, &checkpoint, None)
            .await?;

        tracing::debug!(
            subscriber = %self.config.subscriber_id,
            position,
            "Subscription position written"
        );
        Ok(())
    }

    /// One poll iteration; returns how many messages passed the origin filter
    async fn tick(
        &self,
        store: &MessageStore,
        target: ReadTarget<'_>,
        cursor: &mut Cursor,
    ) -> Result<usize> {
        let batch = store
            .read(
                &self.config.stream_name,
                cursor.position + 1,
                self.config.messages_per_tick,
            )
            .await?;

        if !batch.is_empty() {
            tracing::debug!(
                subscriber = %self.config.subscriber_id,
                from = cursor.position + 1,
                count = batch.len(),
                "Batch read"
            );
        }

        let mut delivered = 0;
        for message in batch {
            let position = target.cursor_of(&message);
            // Own checkpoints show up when reading `$all` or the checkpoint category
            if message.stream_name == self.checkpoint_stream || !self.matches_origin(&message) {
                cursor.skip(position);
                continue;
            }

            delivered += 1;
            self.dispatch(message).await?;

            if cursor.advance(position, self.config.position_update_interval) {
                self.write_position(store, cursor.position).await?;
            }
        }

        Ok(delivered)
    }

    fn matches_origin(&self, message: &Message) -> bool {
        let Some(origin) = self.config.origin_stream_name.as_deref() else {
            return true;
        };

        message
            .origin_stream_name()
            .is_some_and(|stream_name| stream::category(stream_name) == origin)
    }

    async fn dispatch(&self, message: Message) -> Result<()> {
        let Some(handler) = self.config.handlers.get(&message.message_type) else {
            return Ok(());
        };

        let message_type = message.message_type.clone();
        let handled = handler.handle(message);
        let result = match self.config.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, handled).await.map_err(|_| {
                MessageStoreError::Timeout(format!(
                    "Handler for '{}' did not complete within {:?}",
                    message_type, limit
                ))
            })?,
            None => handled.await,
        };

        result.map_err(|e| MessageStoreError::handler(message_type, e))
    }
}
