//! # a3s-message-store
//!
//! Message DB client for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-message-store` writes typed messages to named streams under
//! optimistic concurrency control, reads ordered slices of streams, folds
//! entity streams through projections, and runs resumable, checkpointed
//! polling subscriptions with at-least-once delivery.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_message_store::{MemoryBackend, MessageStore, NewMessage};
//!
//! # async fn example() -> a3s_message_store::Result<()> {
//! // Create a client with the in-memory backend
//! let store = MessageStore::new(MemoryBackend::new());
//!
//! // Write to an entity stream, expecting it to be new
//! let created = NewMessage::new("UrlCreated", serde_json::json!({"url": "https://a3s.dev"}));
//! let position = store.write("url-123", &created, Some(-1)).await?;
//! assert_eq!(position, 0);
//!
//! // Read the whole category back
//! let messages = store.read("url", 0, 100).await?;
//! assert_eq!(messages.len(), 1);
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Streams
//!
//! - `category-id` — one entity's history, ordered by stream position
//! - `category` — every entity stream in the category, ordered by global position
//! - `$all` — every message in the store, ordered by global position
//!
//! ## Backends
//!
//! - **postgres** — Message DB over a single Postgres connection
//! - **memory** — In-memory backend for testing and single-process use
//!
//! ## Architecture
//!
//! - **MessageStoreBackend** trait — call surface every backend implements
//! - **MessageStore** — client with routing, conflict mapping and subscription tracking
//! - **Subscription** — checkpointed poll loop delivering messages to handlers in order
//! - **Projection** — pure fold from messages to entity state

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod projection;
pub mod stream;
pub mod subscription;
pub mod types;

// Re-export core types
pub use backend::{BackendError, BackendErrorKind, MessageStoreBackend};
pub use client::MessageStore;
pub use config::MessageStoreConfig;
pub use error::{MessageStoreError, Result};
pub use projection::{fold, Projection, Projector};
pub use stream::{ReadTarget, ALL_STREAM};
pub use subscription::{
    Handlers, MessageHandler, StopReason, Subscription, SubscriptionConfig, SubscriptionState,
};
pub use types::{Message, NewMessage};

// Re-export backends for convenience
pub use backend::memory::MemoryBackend;
pub use backend::postgres::PostgresBackend;
