//! Stored credentials.
//!
//! Executors never see credentials directly: they ask the store to resolve a
//! credential id on behalf of the workflow owner and get back the secret.
//! Resolution fails if the credential belongs to anyone else.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeflow_core::{CredentialId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The type of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Provider API key.
    ApiKey,
    /// Bearer token.
    BearerToken,
    /// Database connection string.
    ConnectionString,
}

impl CredentialType {
    /// The stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::BearerToken => "bearer_token",
            Self::ConnectionString => "connection_string",
        }
    }

    /// Parses the stored representation.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "api_key" => Some(Self::ApiKey),
            "bearer_token" => Some(Self::BearerToken),
            "connection_string" => Some(Self::ConnectionString),
            _ => None,
        }
    }
}

/// A stored credential, without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Unique identifier.
    pub id: CredentialId,
    /// The user who owns this credential.
    pub user_id: UserId,
    /// Credential name/label.
    pub name: String,
    /// Credential type.
    pub credential_type: CredentialType,
    /// When the credential was created.
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a new credential.
    #[must_use]
    pub fn new(user_id: UserId, name: impl Into<String>, credential_type: CredentialType) -> Self {
        Self {
            id: CredentialId::new(),
            user_id,
            name: name.into(),
            credential_type,
            created_at: Utc::now(),
        }
    }
}

/// Resolves credential secrets for their owner.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the secret of `id` if `owner_id` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] for unknown ids and
    /// [`CredentialError::Unauthorized`] on owner mismatch.
    async fn resolve(&self, id: CredentialId, owner_id: UserId) -> Result<String, CredentialError>;
}

/// Credentials held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    entries: Arc<RwLock<HashMap<CredentialId, (Credential, String)>>>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential with its secret.
    pub async fn insert(&self, credential: Credential, secret: impl Into<String>) -> CredentialId {
        let id = credential.id;
        self.entries
            .write()
            .await
            .insert(id, (credential, secret.into()));
        id
    }

    /// Shorthand for storing an API key owned by `user_id`.
    pub async fn api_key(&self, user_id: UserId, secret: impl Into<String>) -> CredentialId {
        self.insert(
            Credential::new(user_id, "api key", CredentialType::ApiKey),
            secret,
        )
        .await
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn resolve(&self, id: CredentialId, owner_id: UserId) -> Result<String, CredentialError> {
        let entries = self.entries.read().await;
        let (credential, secret) = entries.get(&id).ok_or(CredentialError::NotFound { id })?;
        if credential.user_id != owner_id {
            return Err(CredentialError::Unauthorized {
                id,
                user_id: owner_id,
            });
        }
        Ok(secret.clone())
    }
}
