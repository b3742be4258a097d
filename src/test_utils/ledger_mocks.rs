//! In-memory ledger store.
//!
//! One mutex guards every table, which gives `transact` the same
//! all-or-nothing behavior as a database transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::ledger::{
        AccountRecord, CreditTransactionRecord, Decide, Decision, LedgerRepo, LedgerState,
        SubscriptionEventRecord, SubscriptionRecord, TransitionOutcome, event_metadata,
    },
    domain::entities::{credit_transaction::CreditTransactionType, plan::PlanCode},
};

#[derive(Default)]
pub struct LedgerTables {
    pub accounts: HashMap<Uuid, AccountRecord>,
    pub subscriptions: HashMap<Uuid, SubscriptionRecord>,
    pub credit_transactions: Vec<CreditTransactionRecord>,
    pub events: Vec<SubscriptionEventRecord>,
}

impl LedgerTables {
    fn state(&self, account_id: Uuid) -> LedgerState {
        LedgerState {
            account_id,
            account: self.accounts.get(&account_id).cloned(),
            subscription: self.subscriptions.get(&account_id).cloned(),
            latest_renewal_at: self
                .credit_transactions
                .iter()
                .filter(|t| {
                    t.account_id == account_id
                        && t.transaction_type == CreditTransactionType::Renewal
                })
                .map(|t| t.created_at)
                .max(),
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.metadata.get("idempotency_key").and_then(|v| v.as_str()) == Some(key))
    }
}

#[derive(Default)]
pub struct InMemoryLedgerRepo {
    pub tables: Mutex<LedgerTables>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    load_calls: AtomicUsize,
    transact_calls: AtomicUsize,
}

impl InMemoryLedgerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, account: AccountRecord) -> Self {
        self.tables
            .lock()
            .unwrap()
            .accounts
            .insert(account.id, account);
        self
    }

    pub fn with_subscription(self, subscription: SubscriptionRecord) -> Self {
        self.tables
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.account_id, subscription);
        self
    }

    /// Make every write inside `transact` fail like a lost connection.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `load_state` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn transact_calls(&self) -> usize {
        self.transact_calls.load(Ordering::SeqCst)
    }

    pub fn account(&self, account_id: Uuid) -> Option<AccountRecord> {
        self.tables.lock().unwrap().accounts.get(&account_id).cloned()
    }

    pub fn subscription(&self, account_id: Uuid) -> Option<SubscriptionRecord> {
        self.tables
            .lock()
            .unwrap()
            .subscriptions
            .get(&account_id)
            .cloned()
    }

    pub fn events_for(&self, account_id: Uuid) -> Vec<SubscriptionEventRecord> {
        self.tables
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn credit_transactions_for(&self, account_id: Uuid) -> Vec<CreditTransactionRecord> {
        self.tables
            .lock()
            .unwrap()
            .credit_transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Change an account behind the ledger's back (simulates drift).
    pub fn update_account(&self, account_id: Uuid, f: impl FnOnce(&mut AccountRecord)) {
        if let Some(account) = self.tables.lock().unwrap().accounts.get_mut(&account_id) {
            f(account);
        }
    }
}

#[async_trait]
impl LedgerRepo for InMemoryLedgerRepo {
    async fn load_state(&self, account_id: Uuid) -> AppResult<LedgerState> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated read failure".into()));
        }
        Ok(self.tables.lock().unwrap().state(account_id))
    }

    async fn transact(
        &self,
        account_id: Uuid,
        idempotency_key: Option<&str>,
        decide: Decide<'_>,
    ) -> AppResult<TransitionOutcome> {
        self.transact_calls.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();

        if let Some(key) = idempotency_key
            && tables.has_key(key)
        {
            return Ok(TransitionOutcome::Duplicate);
        }

        // The account row exists inside the transaction even when nothing
        // has been committed for it yet.
        let mut state = tables.state(account_id);
        let fresh_account = AccountRecord {
            id: account_id,
            total_credits: 0,
            used_credits: 0,
            active_plan: PlanCode::Free,
            created_at: now,
            updated_at: now,
        };
        state.account.get_or_insert_with(|| fresh_account.clone());

        let transition = match decide(&state)? {
            Decision::Skip(reason) => return Ok(TransitionOutcome::Skipped(reason)),
            Decision::Apply(transition) => transition,
        };
        transition.check(&state)?;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated write failure".into()));
        }

        let account = tables
            .accounts
            .entry(account_id)
            .or_insert(fresh_account);
        if let Some(write) = transition.account {
            account.total_credits = write.total_credits;
            account.used_credits = write.used_credits;
            account.active_plan = write.active_plan;
            account.updated_at = now;
        }

        if let Some(write) = transition.subscription {
            let existing = tables.subscriptions.get(&account_id);
            let record = SubscriptionRecord {
                id: existing.map(|s| s.id).unwrap_or_else(Uuid::new_v4),
                account_id,
                plan: write.plan,
                status: write.status,
                current_period_start: write.current_period_start,
                current_period_end: write.current_period_end,
                cancel_at_period_end: write.cancel_at_period_end,
                trial_end: write.trial_end,
                external_customer_id: write.external_customer_id,
                external_subscription_id: write.external_subscription_id,
                external_price_id: write.external_price_id,
                last_external_status: write.last_external_status,
                last_external_event_type: write.last_external_event_type,
                canceled_at: write.canceled_at,
                created_at: existing.map(|s| s.created_at).unwrap_or(now),
                updated_at: now,
            };
            tables.subscriptions.insert(account_id, record);
        }

        if let Some(credit) = transition.credit {
            tables.credit_transactions.push(CreditTransactionRecord {
                id: Uuid::new_v4(),
                account_id,
                amount: credit.amount,
                resulting_credits: credit.resulting_credits,
                transaction_type: credit.transaction_type,
                description: credit.description,
                created_at: now,
            });
        }

        if let Some(event) = transition.event {
            let subscription_id = tables
                .subscriptions
                .get(&account_id)
                .map(|s| s.id)
                .ok_or_else(|| AppError::Internal("event without subscription".into()))?;
            tables.events.push(SubscriptionEventRecord {
                id: Uuid::new_v4(),
                account_id,
                subscription_id,
                previous_status: event.previous_status,
                new_status: event.new_status,
                reason: event.reason,
                source: event.source,
                metadata: event_metadata(&event.metadata, idempotency_key),
                created_at: now,
            });
        }

        Ok(TransitionOutcome::Applied(tables.state(account_id)))
    }

    async fn is_applied(&self, idempotency_key: &str) -> AppResult<bool> {
        Ok(self.tables.lock().unwrap().has_key(idempotency_key))
    }

    async fn find_account_by_external_subscription(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<Uuid>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_subscription_id))
            .map(|s| s.account_id))
    }

    async fn find_account_by_external_customer(
        &self,
        external_customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .find(|s| s.external_customer_id.as_deref() == Some(external_customer_id))
            .map(|s| s.account_id))
    }

    async fn list_events(&self, account_id: Uuid) -> AppResult<Vec<SubscriptionEventRecord>> {
        Ok(self.events_for(account_id))
    }

    async fn list_credit_transactions(
        &self,
        account_id: Uuid,
    ) -> AppResult<Vec<CreditTransactionRecord>> {
        Ok(self.credit_transactions_for(account_id))
    }
}
