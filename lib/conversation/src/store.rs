//! Conversation stores.
//!
//! A store is opened for one node execution through a
//! [`ConversationStoreConnector`] and closed when the node finishes.

use crate::error::ConversationError;
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table used when a node does not name one.
pub const DEFAULT_TABLE_NAME: &str = "chat_history";

/// Persistent conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns up to `limit` most recent turns of a session, oldest first.
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationError>;

    /// Appends a turn.
    async fn append(&self, message: &Message) -> Result<(), ConversationError>;

    /// Releases any resources held by the store.
    async fn close(&self) {}
}

/// Opens stores from a connection string.
#[async_trait]
pub trait ConversationStoreConnector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        table_name: &str,
    ) -> Result<Arc<dyn ConversationStore>, ConversationError>;
}

/// Returns true if `name` can be used as an unquoted SQL table name.
#[must_use]
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// Conversation history held in memory, keyed by table then session.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    tables: Arc<Mutex<HashMap<String, Vec<Message>>>>,
    table: String,
    closed: Arc<std::sync::atomic::AtomicUsize>,
}

impl InMemoryConversationStore {
    /// Creates an empty store using the default table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE_NAME.to_string(),
            ..Self::default()
        }
    }

    /// A view of the same data scoped to another table.
    #[must_use]
    pub fn table(&self, table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..self.clone()
        }
    }

    /// Every turn of a session, oldest first.
    pub async fn messages(&self, session_id: &str) -> Vec<Message> {
        self.tables
            .lock()
            .await
            .get(&self.table)
            .map(|rows| {
                rows.iter()
                    .filter(|m| m.session_id == session_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many times [`ConversationStore::close`] was called on any view.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationError> {
        let all = self.messages(session_id).await;
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn append(&self, message: &Message) -> Result<(), ConversationError> {
        self.tables
            .lock()
            .await
            .entry(self.table.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Hands out views of one shared [`InMemoryConversationStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    store: InMemoryConversationStore,
    connections: Arc<Mutex<Vec<String>>>,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new(store: InMemoryConversationStore) -> Self {
        Self {
            store,
            connections: Arc::default(),
        }
    }

    /// Connection strings seen so far.
    pub async fn connections(&self) -> Vec<String> {
        self.connections.lock().await.clone()
    }
}

#[async_trait]
impl ConversationStoreConnector for InMemoryConnector {
    async fn connect(
        &self,
        connection_string: &str,
        table_name: &str,
    ) -> Result<Arc<dyn ConversationStore>, ConversationError> {
        if !is_valid_table_name(table_name) {
            return Err(ConversationError::InvalidTableName {
                name: table_name.to_string(),
            });
        }
        self.connections
            .lock()
            .await
            .push(connection_string.to_string());
        Ok(Arc::new(self.store.table(table_name)))
    }
}
