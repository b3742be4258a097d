use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{plan::PlanCode, subscription_status::SubscriptionStatus};

/// Normalized, read-only view of an account's subscription and credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub account_id: Uuid,
    pub plan: PlanCode,
    pub status: SubscriptionStatus,
    pub credits: i64,
    pub used_credits: i64,
    pub remaining_credits: i64,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
}

impl SubscriptionSnapshot {
    /// Snapshot returned for accounts with no ledger rows yet
    pub fn default_for(account_id: Uuid) -> Self {
        Self {
            account_id,
            plan: PlanCode::Free,
            status: SubscriptionStatus::Inactive,
            credits: 0,
            used_credits: 0,
            remaining_credits: 0,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            trial_end: None,
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        UsageSnapshot {
            account_id: self.account_id,
            credits: self.credits,
            used_credits: self.used_credits,
            remaining_credits: self.remaining_credits,
        }
    }
}

/// Credits-only view served from the short-lived usage cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub account_id: Uuid,
    pub credits: i64,
    pub used_credits: i64,
    pub remaining_credits: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_inactive_free() {
        let id = Uuid::new_v4();
        let snapshot = SubscriptionSnapshot::default_for(id);
        assert_eq!(snapshot.plan, PlanCode::Free);
        assert_eq!(snapshot.status, SubscriptionStatus::Inactive);
        assert_eq!(snapshot.credits, 0);
        assert_eq!(snapshot.usage().account_id, id);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SubscriptionSnapshot::default_for(Uuid::nil())).unwrap();
        assert_eq!(json["usedCredits"], 0);
        assert_eq!(json["cancelAtPeriodEnd"], false);
        assert_eq!(json["plan"], "FREE");
    }
}
