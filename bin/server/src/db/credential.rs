//! Stored credentials in Postgres.
//!
//! Secrets are stored as written by the credential editor; encryption at
//! rest belongs to that service.

use async_trait::async_trait;
use nodeflow_core::{CredentialId, UserId};
use nodeflow_integration::{CredentialError, CredentialStore};
use sqlx::{FromRow, PgPool};
use tracing::warn;

/// Row type for credential lookups.
#[derive(FromRow)]
struct CredentialRow {
    user_id: String,
    secret: String,
}

impl CredentialRow {
    /// Releases the secret only to its owner.
    fn secret_for(self, id: CredentialId, user_id: UserId) -> Result<String, CredentialError> {
        if self.user_id != user_id.to_string() {
            warn!(credential_id = %id, user_id = %user_id, "credential owner mismatch");
            return Err(CredentialError::Unauthorized { id, user_id });
        }
        Ok(self.secret)
    }
}

/// Credential store backed by the `credentials` table.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn resolve(&self, id: CredentialId, user_id: UserId) -> Result<String, CredentialError> {
        let row: Option<CredentialRow> =
            sqlx::query_as("SELECT user_id, secret FROM credentials WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CredentialError::StorageFailed {
                    reason: e.to_string(),
                })?;

        row.ok_or(CredentialError::NotFound { id })?
            .secret_for(id, user_id)
    }
}
