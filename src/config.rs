//! Client configuration

use crate::error::{MessageStoreError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the message store connection URI
pub const DB_URI_ENV: &str = "MESSAGE_STORE_PG_URI";

/// Default number of messages returned by a read when no limit is given
pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// Connection descriptor for a message store client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStoreConfig {
    /// Postgres connection URI (e.g., `postgres://postgres@localhost:5433/message_store`)
    pub db_uri: String,

    /// Schema search path set on connect (default: `message_store, public`)
    #[serde(default = "default_search_path")]
    pub search_path: String,

    /// Maximum messages per read for `read_from_start` and entity loading
    #[serde(default = "default_batch_size")]
    pub default_batch_size: i64,
}

fn default_search_path() -> String {
    "message_store, public".to_string()
}

fn default_batch_size() -> i64 {
    DEFAULT_BATCH_SIZE
}

impl Default for MessageStoreConfig {
    fn default() -> Self {
        Self {
            db_uri: "postgres://postgres@localhost:5432/message_store".to_string(),
            search_path: default_search_path(),
            default_batch_size: default_batch_size(),
        }
    }
}

impl MessageStoreConfig {
    /// Create a config for the given connection URI with default settings
    pub fn new(db_uri: impl Into<String>) -> Self {
        Self {
            db_uri: db_uri.into(),
            ..Self::default()
        }
    }

    /// Load the connection URI from `MESSAGE_STORE_PG_URI`
    pub fn from_env() -> Result<Self> {
        let db_uri = std::env::var(DB_URI_ENV).map_err(|e| {
            MessageStoreError::Config(format!("Failed to read {}: {}", DB_URI_ENV, e))
        })?;
        let config = Self::new(db_uri);
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.db_uri.trim().is_empty() {
            return Err(MessageStoreError::Config("dbUri must not be empty".to_string()));
        }
        if self.default_batch_size <= 0 {
            return Err(MessageStoreError::Config(format!(
                "defaultBatchSize must be positive, got {}",
                self.default_batch_size
            )));
        }
        Ok(())
    }
}
