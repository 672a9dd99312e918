//! Monthly execution allowance.

use crate::error::EntitlementError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use nodeflow_core::UserId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Executions allowed per owner per UTC calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub monthly_limit: u64,
}

impl QuotaPolicy {
    /// Returns true if `used` executions, the current one included, is over
    /// the allowance.
    #[must_use]
    pub fn is_exceeded(&self, used: u64) -> bool {
        used > self.monthly_limit
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self { monthly_limit: 100 }
    }
}

/// Start of the UTC calendar month containing `now`.
#[must_use]
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map_or(now, |start| start.and_utc())
}

/// Answers whether an owner holds a paid subscription.
#[async_trait]
pub trait Entitlements: Send + Sync {
    async fn has_active_subscription(&self, owner_id: UserId) -> Result<bool, EntitlementError>;
}

/// A fixed set of subscribed owners.
#[derive(Debug, Clone, Default)]
pub struct StaticEntitlements {
    subscribed: Arc<RwLock<HashSet<UserId>>>,
}

impl StaticEntitlements {
    /// Creates a set with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an owner as subscribed.
    pub async fn subscribe(&self, owner_id: UserId) {
        self.subscribed.write().await.insert(owner_id);
    }
}

#[async_trait]
impl Entitlements for StaticEntitlements {
    async fn has_active_subscription(&self, owner_id: UserId) -> Result<bool, EntitlementError> {
        Ok(self.subscribed.read().await.contains(&owner_id))
    }
}
