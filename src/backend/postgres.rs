//! Postgres backend for Message DB
//!
//! Calls the Message DB server functions over a single connection. All
//! calls are serialized on that connection.

use super::{BackendError, BackendResult, MessageStoreBackend};
use crate::config::MessageStoreConfig;
use crate::types::{Message, NewMessage};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use sqlx::{Connection, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

const WRITE_MESSAGE: &str = "SELECT message_store.write_message($1, $2, $3, $4, $5, $6)";

const GET_STREAM_MESSAGES: &str = "SELECT id, stream_name, type, position, global_position, \
     data, metadata, time FROM get_stream_messages($1, $2, $3)";

const GET_CATEGORY_MESSAGES: &str = "SELECT id, stream_name, type, position, global_position, \
     data, metadata, time FROM get_category_messages($1, $2, $3)";

const GET_LAST_STREAM_MESSAGE: &str = "SELECT id, stream_name, type, position, global_position, \
     data, metadata, time FROM get_last_stream_message($1)";

const GET_ALL_MESSAGES: &str = r"
    SELECT
        id::varchar AS id,
        stream_name::varchar AS stream_name,
        type::varchar AS type,
        position::bigint AS position,
        global_position::bigint AS global_position,
        data::varchar AS data,
        metadata::varchar AS metadata,
        time::timestamp AS time
    FROM
        messages
    WHERE
        global_position >= $1
    ORDER BY
        global_position ASC
    LIMIT $2";

/// Message DB backend over one Postgres connection
pub struct PostgresBackend {
    /// `None` once closed
    conn: Mutex<Option<PgConnection>>,
}

impl PostgresBackend {
    /// Connect and set the configured search path
    pub async fn connect(config: &MessageStoreConfig) -> BackendResult<Self> {
        let mut conn = PgConnection::connect(&config.db_uri)
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        let set_search_path = format!("SET search_path = {}", config.search_path);
        sqlx::query(&set_search_path)
            .execute(&mut conn)
            .await
            .map_err(translate)?;

        tracing::info!(search_path = %config.search_path, "Initialized message store");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn fetch(&self, sql: &str, bind: Bind<'_>) -> BackendResult<Vec<Message>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;

        let query = sqlx::query(sql);
        let query = match bind {
            Bind::Stream(name, from, limit) => query.bind(name).bind(from).bind(limit),
            Bind::Global(from, limit) => query.bind(from).bind(limit),
            Bind::Name(name) => query.bind(name),
        };

        let rows = query.fetch_all(&mut *conn).await.map_err(translate)?;
        rows.iter().map(decode_row).collect()
    }
}

enum Bind<'a> {
    Stream(&'a str, i64, i64),
    Global(i64, Option<i64>),
    Name(&'a str),
}

/// Negative limits mean "no limit"; the server functions take -1 for that
/// themselves, the raw `$all` query needs `LIMIT NULL`
fn limit_param(limit: i64) -> Option<i64> {
    (limit >= 0).then_some(limit)
}

fn closed() -> BackendError {
    BackendError::connection("Connection terminated: backend is closed")
}

fn translate(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) => BackendError::from_message(db.message()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => BackendError::connection(err.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => BackendError::decode(err.to_string()),
        _ => BackendError::query(err.to_string()),
    }
}

/// Parse a text-encoded JSON column; absent or empty text is an empty object
fn json_column(raw: Option<String>, column: &str) -> BackendResult<Value> {
    match raw.as_deref() {
        None | Some("") => Ok(Value::Object(Map::new())),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| BackendError::decode(format!("invalid {} JSON: {}", column, e))),
    }
}

fn decode_row(row: &PgRow) -> BackendResult<Message> {
    let id: String = row.try_get("id").map_err(translate)?;
    let time: NaiveDateTime = row.try_get("time").map_err(translate)?;

    Ok(Message {
        id: Uuid::parse_str(&id)
            .map_err(|e| BackendError::decode(format!("invalid message id '{}': {}", id, e)))?,
        message_type: row.try_get("type").map_err(translate)?,
        stream_name: row.try_get("stream_name").map_err(translate)?,
        position: row.try_get("position").map_err(translate)?,
        global_position: row.try_get("global_position").map_err(translate)?,
        data: json_column(row.try_get("data").map_err(translate)?, "data")?,
        metadata: json_column(row.try_get("metadata").map_err(translate)?, "metadata")?,
        time: time.and_utc(),
    })
}

#[async_trait]
impl MessageStoreBackend for PostgresBackend {
    async fn write_message(
        &self,
        stream_name: &str,
        message: &NewMessage,
        expected_version: Option<i64>,
    ) -> BackendResult<i64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;

        sqlx::query_scalar::<_, i64>(WRITE_MESSAGE)
            .bind(message.id.to_string())
            .bind(stream_name)
            .bind(&message.message_type)
            .bind(Json(&message.data))
            .bind(message.metadata.as_ref().map(Json))
            .bind(expected_version)
            .fetch_one(&mut *conn)
            .await
            .map_err(translate)
    }

    async fn get_stream_messages(
        &self,
        stream_name: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.fetch(
            GET_STREAM_MESSAGES,
            Bind::Stream(stream_name, from_position, limit),
        )
        .await
    }

    async fn get_category_messages(
        &self,
        category: &str,
        from_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.fetch(
            GET_CATEGORY_MESSAGES,
            Bind::Stream(category, from_position, limit),
        )
        .await
    }

    async fn get_all_messages(
        &self,
        from_global_position: i64,
        limit: i64,
    ) -> BackendResult<Vec<Message>> {
        self.fetch(
            GET_ALL_MESSAGES,
            Bind::Global(from_global_position, limit_param(limit)),
        )
        .await
    }

    async fn get_last_stream_message(&self, stream_name: &str) -> BackendResult<Option<Message>> {
        let mut messages = self
            .fetch(GET_LAST_STREAM_MESSAGE, Bind::Name(stream_name))
            .await?;
        Ok(messages.pop())
    }

    async fn close(&self) -> BackendResult<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close()
                .await
                .map_err(|e| BackendError::connection(e.to_string()))?;
            tracing::info!("Message store connection closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;

    #[test]
    fn test_limit_param() {
        assert_eq!(limit_param(100), Some(100));
        assert_eq!(limit_param(0), Some(0));
        assert_eq!(limit_param(-1), None);
    }

    #[test]
    fn test_json_column() {
        assert_eq!(json_column(None, "data").unwrap(), serde_json::json!({}));
        assert_eq!(
            json_column(Some(String::new()), "data").unwrap(),
            serde_json::json!({})
        );
        assert_eq!(
            json_column(Some(r#"{"position":7}"#.to_string()), "data").unwrap()["position"],
            7
        );
        let err = json_column(Some("{".to_string()), "metadata").unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::Decode);
    }

    #[test]
    fn test_translate_non_database_errors() {
        assert_eq!(
            translate(sqlx::Error::PoolTimedOut).kind(),
            BackendErrorKind::Connection
        );
        assert_eq!(
            translate(sqlx::Error::RowNotFound).kind(),
            BackendErrorKind::Query
        );
        assert_eq!(
            translate(sqlx::Error::ColumnNotFound("time".to_string())).kind(),
            BackendErrorKind::Decode
        );
    }
}
