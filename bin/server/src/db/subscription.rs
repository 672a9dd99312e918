//! Paid subscriptions, read for quota exemption.
//!
//! Billing writes this table; the engine only asks whether a user currently
//! holds an active subscription.

use async_trait::async_trait;
use nodeflow_core::UserId;
use nodeflow_workflow::{EntitlementError, Entitlements};
use sqlx::PgPool;

/// Entitlements backed by the `subscriptions` table.
#[derive(Clone)]
pub struct PgEntitlements {
    pool: PgPool,
}

impl PgEntitlements {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Entitlements for PgEntitlements {
    async fn has_active_subscription(&self, owner_id: UserId) -> Result<bool, EntitlementError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM subscriptions
                WHERE user_id = $1
                  AND status = 'active'
                  AND (current_period_end IS NULL OR current_period_end > NOW())
            )
            "#,
        )
        .bind(owner_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EntitlementError::Unavailable {
            details: e.to_string(),
        })
    }
}
