//! Conversation memory for nodeflow.
//!
//! This crate provides:
//!
//! - **Messages**: stored conversation turns
//! - **Stores**: the [`ConversationStore`] trait with in-memory and Postgres implementations
//! - **Connectors**: opening a store from a user-supplied connection string

pub mod error;
pub mod message;
pub mod postgres;
pub mod store;

pub use error::ConversationError;
pub use message::{Message, MessageRole};
pub use postgres::{PgConnector, PgConversationStore};
pub use store::{
    ConversationStore, ConversationStoreConnector, DEFAULT_TABLE_NAME, InMemoryConnector,
    InMemoryConversationStore,
};
