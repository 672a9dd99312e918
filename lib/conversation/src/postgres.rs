//! Postgres-backed conversation history.

use crate::error::ConversationError;
use crate::message::{Message, MessageRole};
use crate::store::{ConversationStore, ConversationStoreConnector, is_valid_table_name};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeflow_core::MessageId;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Row type for message queries.
#[derive(FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn try_into_message(self) -> Result<Message, ConversationError> {
        let id = MessageId::from_str(&self.id).map_err(|e| ConversationError::InvalidData {
            reason: format!("invalid message id '{}': {e}", self.id),
        })?;
        let role = MessageRole::from_str_value(&self.role).ok_or_else(|| {
            ConversationError::InvalidData {
                reason: format!("unknown role '{}'", self.role),
            }
        })?;
        Ok(Message {
            id,
            session_id: self.session_id,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

/// A conversation table in a user-supplied Postgres database.
pub struct PgConversationStore {
    pool: PgPool,
    table: String,
}

impl PgConversationStore {
    /// Wraps a pool, creating the table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is unsafe or the DDL fails.
    pub async fn open(pool: PgPool, table: &str) -> Result<Self, ConversationError> {
        if !is_valid_table_name(table) {
            return Err(ConversationError::InvalidTableName {
                name: table.to_string(),
            });
        }
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ))
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_session_idx ON {table} (session_id, created_at)"
        ))
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM {}
            WHERE session_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            self.table
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .rev()
            .map(MessageRow::try_into_message)
            .collect()
    }

    async fn append(&self, message: &Message) -> Result<(), ConversationError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, session_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            self.table
        ))
        .bind(message.id.to_string())
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        debug!(table = %self.table, "closing conversation pool");
        self.pool.close().await;
    }
}

/// Opens a small dedicated pool per connection string.
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    #[must_use]
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            max_connections,
            acquire_timeout,
        }
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(10))
    }
}

#[async_trait]
impl ConversationStoreConnector for PgConnector {
    async fn connect(
        &self,
        connection_string: &str,
        table_name: &str,
    ) -> Result<Arc<dyn ConversationStore>, ConversationError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(connection_string)
            .await
            .map_err(|e| ConversationError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        match PgConversationStore::open(pool.clone(), table_name).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_decoding_rejects_unknown_roles() {
        let row = MessageRow {
            id: MessageId::new().to_string(),
            session_id: "s".to_string(),
            role: "robot".to_string(),
            content: "hi".to_string(),
            created_at: Utc::now(),
        };
        assert!(matches!(
            row.try_into_message(),
            Err(ConversationError::InvalidData { .. })
        ));
    }

    #[test]
    fn row_decoding() {
        let id = MessageId::new();
        let row = MessageRow {
            id: id.to_string(),
            session_id: "s".to_string(),
            role: "assistant".to_string(),
            content: "hi".to_string(),
            created_at: Utc::now(),
        };
        let message = row.try_into_message().unwrap();
        assert_eq!(message.id, id);
        assert_eq!(message.role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connection_failure() {
        let connector = PgConnector::new(1, Duration::from_millis(200));
        let err = connector
            .connect("postgres://nobody@127.0.0.1:1/none", "chat_history")
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }
}
