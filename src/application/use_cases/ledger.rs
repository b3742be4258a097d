use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::{
        credit_transaction::{CreditBalance, CreditTransactionType},
        plan::PlanCode,
        snapshot::{SubscriptionSnapshot, UsageSnapshot},
        subscription_event::EventSource,
        subscription_status::SubscriptionStatus,
    },
};

// ============================================================================
// Ledger Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub total_credits: i64,
    pub used_credits: i64,
    pub active_plan: PlanCode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn balance(&self) -> CreditBalance {
        CreditBalance::new(self.total_credits, self.used_credits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan: PlanCode,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub external_price_id: Option<String>,
    pub last_external_status: Option<String>,
    pub last_external_event_type: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub resulting_credits: i64,
    pub transaction_type: CreditTransactionType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEventRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub subscription_id: Uuid,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: SubscriptionStatus,
    pub reason: String,
    pub source: EventSource,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Rows of one account as seen inside (or outside) a ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerState {
    pub account_id: Uuid,
    pub account: Option<AccountRecord>,
    pub subscription: Option<SubscriptionRecord>,
    /// Creation time of the most recent RENEWAL transaction
    pub latest_renewal_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    pub fn empty(account_id: Uuid) -> Self {
        Self {
            account_id,
            account: None,
            subscription: None,
            latest_renewal_at: None,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.subscription
            .as_ref()
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn balance(&self) -> CreditBalance {
        self.account
            .as_ref()
            .map(AccountRecord::balance)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        if self.account.is_none() && self.subscription.is_none() {
            return SubscriptionSnapshot::default_for(self.account_id);
        }

        let status = self.status();
        let plan = match (&self.subscription, &self.account) {
            _ if !status.is_usable() => PlanCode::Free,
            (Some(sub), _) => sub.plan,
            (None, Some(account)) => account.active_plan,
            (None, None) => PlanCode::Free,
        };

        // A lapsed or free account never shows usage beyond its allotment.
        let balance = if plan == PlanCode::Free || status == SubscriptionStatus::Inactive {
            self.balance().clamped()
        } else {
            self.balance()
        };

        let sub = self.subscription.as_ref();
        SubscriptionSnapshot {
            account_id: self.account_id,
            plan,
            status,
            credits: balance.total,
            used_credits: balance.used,
            remaining_credits: balance.remaining(),
            current_period_start: sub.and_then(|s| s.current_period_start),
            current_period_end: sub.and_then(|s| s.current_period_end),
            cancel_at_period_end: sub.map(|s| s.cancel_at_period_end).unwrap_or(false),
            trial_end: sub.and_then(|s| s.trial_end),
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.snapshot().usage()
    }
}

// ============================================================================
// Transition Inputs
// ============================================================================

/// Desired state of the account's subscription row after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionWrite {
    pub plan: PlanCode,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub external_price_id: Option<String>,
    pub last_external_status: Option<String>,
    pub last_external_event_type: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl SubscriptionWrite {
    pub fn new(plan: PlanCode, status: SubscriptionStatus) -> Self {
        Self {
            plan,
            status,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            trial_end: None,
            external_customer_id: None,
            external_subscription_id: None,
            external_price_id: None,
            last_external_status: None,
            last_external_event_type: None,
            canceled_at: None,
        }
    }

    /// Start from the stored row so a transition only states what changes.
    pub fn from_record(record: &SubscriptionRecord) -> Self {
        Self {
            plan: record.plan,
            status: record.status,
            current_period_start: record.current_period_start,
            current_period_end: record.current_period_end,
            cancel_at_period_end: record.cancel_at_period_end,
            trial_end: record.trial_end,
            external_customer_id: record.external_customer_id.clone(),
            external_subscription_id: record.external_subscription_id.clone(),
            external_price_id: record.external_price_id.clone(),
            last_external_status: record.last_external_status.clone(),
            last_external_event_type: record.last_external_event_type.clone(),
            canceled_at: record.canceled_at,
        }
    }

    /// Whether writing this would leave the stored row unchanged
    pub fn matches(&self, record: &SubscriptionRecord) -> bool {
        *self == Self::from_record(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountWrite {
    pub total_credits: i64,
    pub used_credits: i64,
    pub active_plan: PlanCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCreditTransaction {
    pub amount: i64,
    pub resulting_credits: i64,
    pub transaction_type: CreditTransactionType,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionEvent {
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: SubscriptionStatus,
    pub reason: String,
    pub source: EventSource,
    pub metadata: serde_json::Value,
}

/// Writes applied atomically for one account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    pub subscription: Option<SubscriptionWrite>,
    pub account: Option<AccountWrite>,
    pub credit: Option<NewCreditTransaction>,
    pub event: Option<NewSubscriptionEvent>,
}

impl Transition {
    /// Every subscription mutation carries exactly one event row, and an
    /// event row always belongs to a subscription.
    pub fn check(&self, state: &LedgerState) -> AppResult<()> {
        if self.subscription.is_some() && self.event.is_none() {
            return Err(AppError::Internal(
                "subscription write without an event row".into(),
            ));
        }
        if self.event.is_some() && self.subscription.is_none() && state.subscription.is_none() {
            return Err(AppError::Internal(
                "event row without a subscription".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Apply(Transition),
    /// Nothing to do. Nothing is written and the idempotency key stays unused.
    Skip(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(LedgerState),
    /// The idempotency key was already recorded
    Duplicate,
    Skipped(String),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Pure transition function evaluated against the locked ledger rows.
pub type Decide<'a> = &'a (dyn Fn(&LedgerState) -> AppResult<Decision> + Send + Sync);

/// Merge the idempotency key into an event's metadata object.
pub fn event_metadata(
    metadata: &serde_json::Value,
    idempotency_key: Option<&str>,
) -> serde_json::Value {
    let mut merged = match metadata {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".into(), other.clone());
            map
        }
    };
    if let Some(key) = idempotency_key {
        merged.insert("idempotency_key".into(), serde_json::Value::from(key));
    }
    serde_json::Value::Object(merged)
}

// ============================================================================
// Ledger Store Port
// ============================================================================

#[async_trait]
pub trait LedgerRepo: Send + Sync {
    /// Read an account's rows without creating anything.
    async fn load_state(&self, account_id: Uuid) -> AppResult<LedgerState>;

    /// Run one transition in a single transaction scoped to `account_id`.
    ///
    /// The account row is created if missing and locked, then the
    /// idempotency key is checked, then `decide` runs against the locked
    /// rows and its writes are applied. Errors from `decide` or from any
    /// write roll everything back.
    async fn transact(
        &self,
        account_id: Uuid,
        idempotency_key: Option<&str>,
        decide: Decide<'_>,
    ) -> AppResult<TransitionOutcome>;

    /// Whether a transition with this idempotency key was committed.
    async fn is_applied(&self, idempotency_key: &str) -> AppResult<bool>;

    async fn find_account_by_external_subscription(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<Uuid>>;

    async fn find_account_by_external_customer(
        &self,
        external_customer_id: &str,
    ) -> AppResult<Option<Uuid>>;

    /// Oldest first.
    async fn list_events(&self, account_id: Uuid) -> AppResult<Vec<SubscriptionEventRecord>>;

    /// Oldest first.
    async fn list_credit_transactions(
        &self,
        account_id: Uuid,
    ) -> AppResult<Vec<CreditTransactionRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_account, create_test_subscription};

    #[test]
    fn empty_state_snapshot_is_default() {
        let id = Uuid::new_v4();
        assert_eq!(
            LedgerState::empty(id).snapshot(),
            SubscriptionSnapshot::default_for(id)
        );
    }

    #[test]
    fn inactive_account_usage_is_clamped() {
        let id = Uuid::new_v4();
        let state = LedgerState {
            account_id: id,
            account: Some(create_test_account(id, |a| {
                a.total_credits = 50;
                a.used_credits = 90;
                a.active_plan = PlanCode::Pro;
            })),
            subscription: Some(create_test_subscription(id, |s| {
                s.plan = PlanCode::Pro;
                s.status = SubscriptionStatus::Inactive;
            })),
            latest_renewal_at: None,
        };

        let snapshot = state.snapshot();
        assert_eq!(snapshot.plan, PlanCode::Free);
        assert_eq!(snapshot.credits, 50);
        assert_eq!(snapshot.used_credits, 50);
        assert_eq!(snapshot.remaining_credits, 0);
    }

    #[test]
    fn paid_active_snapshot_reports_plan() {
        let id = Uuid::new_v4();
        let state = LedgerState {
            account_id: id,
            account: Some(create_test_account(id, |a| {
                a.total_credits = 100;
                a.used_credits = 40;
                a.active_plan = PlanCode::Pro;
            })),
            subscription: Some(create_test_subscription(id, |s| {
                s.plan = PlanCode::Pro;
                s.status = SubscriptionStatus::Active;
            })),
            latest_renewal_at: None,
        };

        let snapshot = state.snapshot();
        assert_eq!(snapshot.plan, PlanCode::Pro);
        assert_eq!(snapshot.status, SubscriptionStatus::Active);
        assert_eq!(snapshot.remaining_credits, 60);
    }

    #[test]
    fn subscription_write_requires_event() {
        let state = LedgerState::empty(Uuid::new_v4());
        let transition = Transition {
            subscription: Some(SubscriptionWrite::new(
                PlanCode::Free,
                SubscriptionStatus::Active,
            )),
            ..Default::default()
        };
        assert!(matches!(
            transition.check(&state),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn event_requires_subscription() {
        let state = LedgerState::empty(Uuid::new_v4());
        let transition = Transition {
            event: Some(NewSubscriptionEvent {
                previous_status: None,
                new_status: SubscriptionStatus::Active,
                reason: "test".into(),
                source: EventSource::Internal,
                metadata: serde_json::Value::Null,
            }),
            ..Default::default()
        };
        assert!(transition.check(&state).is_err());
    }

    #[test]
    fn metadata_gets_idempotency_key() {
        let merged = event_metadata(&serde_json::json!({ "event_id": "evt_1" }), Some("event:evt_1"));
        assert_eq!(merged["event_id"], "evt_1");
        assert_eq!(merged["idempotency_key"], "event:evt_1");

        let bare = event_metadata(&serde_json::Value::Null, None);
        assert_eq!(bare, serde_json::json!({}));
    }
}
