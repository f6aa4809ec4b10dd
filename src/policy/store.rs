//! Policy read access.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::model::Policy;
use crate::store::Database;

/// Settings key holding a coach's policy document.
pub const POLICY_SETTINGS_KEY: &str = "ai_policy";

/// Read-only source of per-coach policy.
///
/// Infallible by contract: an unavailable or unreadable policy resolves to
/// defaults so ingestion never fails on configuration.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, coach_id: &str) -> Policy;
}

/// Policy read from the `settings` table on every call.
pub struct SettingsPolicyStore {
    db: Arc<dyn Database>,
}

impl SettingsPolicyStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PolicyStore for SettingsPolicyStore {
    async fn get_policy(&self, coach_id: &str) -> Policy {
        match self.db.get_setting(coach_id, POLICY_SETTINGS_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Policy>(value) {
                Ok(policy) => policy.sanitized(),
                Err(e) => {
                    warn!(coach_id, error = %e, "Malformed policy document, using defaults");
                    Policy::default()
                }
            },
            Ok(None) => Policy::default(),
            Err(e) => {
                warn!(coach_id, error = %e, "Policy unavailable, using defaults");
                Policy::default()
            }
        }
    }
}

/// Fixed policy, for tests and embedding.
pub struct StaticPolicyStore {
    policy: Policy,
}

impl StaticPolicyStore {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: policy.sanitized(),
        }
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn get_policy(&self, _coach_id: &str) -> Policy {
        self.policy.clone()
    }
}
