use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        plan_catalog::PlanCatalog,
        ports::payment_gateway::{CheckoutRequest, CheckoutSession, CustomerId, PaymentGatewayPort},
        snapshot_cache::SnapshotCaches,
        use_cases::{
            ledger::{
                AccountWrite, CreditTransactionRecord, Decision, LedgerRepo, LedgerState,
                NewCreditTransaction, SubscriptionEventRecord, Transition, TransitionOutcome,
            },
            reconciler::Reconciler,
        },
        validators::{is_valid_description, is_valid_email},
    },
    domain::entities::{
        credit_transaction::{CreditBalance, CreditTransactionType, replay},
        plan::{BillingDuration, PlanCode},
        snapshot::{SubscriptionSnapshot, UsageSnapshot},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Free plan, applied immediately
    Activated(SubscriptionSnapshot),
    /// Paid plan; the change lands when the gateway confirms the checkout
    Checkout(CheckoutSession),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHistory {
    pub events: Vec<SubscriptionEventRecord>,
    pub transactions: Vec<CreditTransactionRecord>,
}

/// Result of replaying an account's credit transactions against its balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    pub account_id: Uuid,
    pub replayed: CreditBalance,
    pub recorded: CreditBalance,
    pub consistent: bool,
    pub transaction_count: usize,
}

/// Entry point for callers: reads go through the snapshot caches, commands
/// go through the reconciler or straight to the ledger.
#[derive(Clone)]
pub struct SubscriptionUseCases {
    reconciler: Arc<Reconciler>,
    ledger: Arc<dyn LedgerRepo>,
    gateway: Arc<dyn PaymentGatewayPort>,
    catalog: Arc<PlanCatalog>,
    caches: Arc<SnapshotCaches>,
    app_origin: String,
}

impl SubscriptionUseCases {
    pub fn new(
        reconciler: Arc<Reconciler>,
        ledger: Arc<dyn LedgerRepo>,
        gateway: Arc<dyn PaymentGatewayPort>,
        catalog: Arc<PlanCatalog>,
        caches: Arc<SnapshotCaches>,
        app_origin: String,
    ) -> Self {
        Self {
            reconciler,
            ledger,
            gateway,
            catalog,
            caches,
            app_origin,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Never fails: a ledger error degrades to the default snapshot.
    #[instrument(skip(self))]
    pub async fn get_status(&self, account_id: Uuid) -> SubscriptionSnapshot {
        let ledger = &self.ledger;
        let result = self
            .caches
            .snapshots
            .get_or_fetch(account_id, || async move {
                Ok(ledger.load_state(account_id).await?.snapshot())
            })
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%account_id, error = %e, "Ledger read failed, serving default snapshot");
                SubscriptionSnapshot::default_for(account_id)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_usage(&self, account_id: Uuid) -> AppResult<UsageSnapshot> {
        let ledger = &self.ledger;
        self.caches
            .usage
            .get_or_fetch(account_id, || async move {
                Ok(ledger.load_state(account_id).await?.usage())
            })
            .await
    }

    /// Drop cached views, optionally pull from the gateway, expire anything
    /// that lapsed, and return a freshly computed snapshot.
    #[instrument(skip(self))]
    pub async fn refresh(&self, account_id: Uuid, force: bool) -> AppResult<SubscriptionSnapshot> {
        self.caches.invalidate(account_id);

        if force {
            match self.reconciler.sync_from_gateway(account_id).await {
                Ok(_) => {}
                Err(AppError::ExternalGateway(e)) => {
                    warn!(%account_id, error = %e, "Gateway sync failed, refreshing from ledger only");
                }
                Err(e) => return Err(e),
            }
        }

        self.reconciler.expire_lapsed(account_id).await?;
        self.fresh_snapshot(account_id).await
    }

    #[instrument(skip(self))]
    pub async fn history(&self, account_id: Uuid) -> AppResult<SubscriptionHistory> {
        let events = self.ledger.list_events(account_id).await?;
        let transactions = self.ledger.list_credit_transactions(account_id).await?;
        Ok(SubscriptionHistory {
            events,
            transactions,
        })
    }

    #[instrument(skip(self))]
    pub async fn audit_ledger(&self, account_id: Uuid) -> AppResult<LedgerAudit> {
        let transactions = self.ledger.list_credit_transactions(account_id).await?;
        let state = self.ledger.load_state(account_id).await?;

        let replayed = replay(
            transactions
                .iter()
                .map(|t| (t.transaction_type, t.amount)),
        );
        let recorded = state.balance();
        let consistent = replayed == recorded;
        if !consistent {
            warn!(
                %account_id,
                replayed_total = replayed.total,
                replayed_used = replayed.used,
                recorded_total = recorded.total,
                recorded_used = recorded.used,
                "Credit ledger does not match account balance"
            );
        }

        Ok(LedgerAudit {
            account_id,
            replayed,
            recorded,
            consistent,
            transaction_count: transactions.len(),
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[instrument(skip(self, email))]
    pub async fn subscribe(
        &self,
        account_id: Uuid,
        plan: PlanCode,
        duration: BillingDuration,
        email: Option<&str>,
    ) -> AppResult<SubscribeOutcome> {
        if !plan.is_paid() {
            self.reconciler.activate_free(account_id).await?;
            let snapshot = self.fresh_snapshot(account_id).await?;
            return Ok(SubscribeOutcome::Activated(snapshot));
        }

        let price_id = self.catalog.price_id(plan, duration)?.to_string();
        if let Some(email) = email
            && !is_valid_email(email)
        {
            return Err(AppError::Validation("invalid email".into()));
        }

        let state = self.ledger.load_state(account_id).await?;
        if let Some(sub) = &state.subscription
            && sub.external_subscription_id.is_some()
            && sub.status.is_usable()
        {
            return Err(AppError::AlreadySubscribed);
        }

        let existing_customer = state
            .subscription
            .as_ref()
            .and_then(|s| s.external_customer_id.as_deref())
            .map(CustomerId::new);
        let customer_id = match existing_customer {
            Some(id) => id,
            None => self.gateway.create_customer(account_id, email).await?,
        };

        let request = CheckoutRequest {
            account_id,
            customer_id,
            price_id,
            plan,
            duration,
            success_url: format!(
                "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.app_origin
            ),
            cancel_url: format!("{}/billing/cancel", self.app_origin),
        };
        let session = self.gateway.create_checkout_session(&request).await?;

        info!(
            %account_id,
            %plan,
            months = duration.months(),
            session_id = %session.session_id,
            "Checkout session created"
        );
        Ok(SubscribeOutcome::Checkout(session))
    }

    #[instrument(skip(self))]
    pub async fn start_trial(
        &self,
        account_id: Uuid,
        plan: PlanCode,
    ) -> AppResult<SubscriptionSnapshot> {
        self.reconciler.start_trial(account_id, plan).await?;
        self.fresh_snapshot(account_id).await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, account_id: Uuid) -> AppResult<SubscriptionSnapshot> {
        self.reconciler.cancel(account_id).await?;
        self.fresh_snapshot(account_id).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, account_id: Uuid) -> AppResult<SubscriptionSnapshot> {
        self.reconciler.resume(account_id).await?;
        self.fresh_snapshot(account_id).await
    }

    /// Consume `amount` credits. All-or-nothing: an amount above the
    /// remaining balance changes nothing.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        account_id: Uuid,
        amount: i64,
        description: Option<&str>,
    ) -> AppResult<UsageSnapshot> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "usage amount must be positive".into(),
            ));
        }
        if let Some(description) = description
            && !is_valid_description(description)
        {
            return Err(AppError::Validation("invalid usage description".into()));
        }
        let description = description.map(str::trim).unwrap_or("Usage").to_string();

        let decide = |state: &LedgerState| decide_usage(state, amount, &description);
        let outcome = self.ledger.transact(account_id, None, &decide).await?;
        let TransitionOutcome::Applied(state) = outcome else {
            return Err(AppError::Internal(format!(
                "usage write returned {outcome:?}"
            )));
        };

        self.caches.invalidate(account_id);
        let usage = state.usage();
        info!(%account_id, amount, remaining = usage.remaining_credits, "Usage recorded");
        Ok(usage)
    }

    /// Operator correction of an account's credit total.
    #[instrument(skip(self))]
    pub async fn adjust_credits(
        &self,
        account_id: Uuid,
        delta: i64,
        reason: &str,
    ) -> AppResult<UsageSnapshot> {
        if delta == 0 {
            return Err(AppError::Validation("adjustment must be non-zero".into()));
        }
        if !is_valid_description(reason) {
            return Err(AppError::Validation("adjustment needs a reason".into()));
        }
        let reason = reason.trim();

        let decide = |state: &LedgerState| decide_adjustment(state, delta, reason);
        let outcome = self.ledger.transact(account_id, None, &decide).await?;
        let TransitionOutcome::Applied(state) = outcome else {
            return Err(AppError::Internal(format!(
                "adjustment write returned {outcome:?}"
            )));
        };

        self.caches.invalidate(account_id);
        info!(%account_id, delta, reason, "Credits adjusted");
        Ok(state.usage())
    }

    async fn fresh_snapshot(&self, account_id: Uuid) -> AppResult<SubscriptionSnapshot> {
        let snapshot = self.ledger.load_state(account_id).await?.snapshot();
        self.caches.snapshots.insert(account_id, snapshot.clone());
        Ok(snapshot)
    }
}

fn active_plan(state: &LedgerState) -> PlanCode {
    state
        .account
        .as_ref()
        .map(|a| a.active_plan)
        .unwrap_or_default()
}

fn decide_usage(state: &LedgerState, amount: i64, description: &str) -> AppResult<Decision> {
    let available = state.snapshot().remaining_credits;
    if amount > available {
        return Err(AppError::InsufficientCredits {
            requested: amount,
            available,
        });
    }

    let balance = state.balance();
    Ok(Decision::Apply(Transition {
        account: Some(AccountWrite {
            total_credits: balance.total,
            used_credits: balance.used + amount,
            active_plan: active_plan(state),
        }),
        credit: Some(NewCreditTransaction {
            amount: -amount,
            resulting_credits: available - amount,
            transaction_type: CreditTransactionType::Usage,
            description: description.to_string(),
        }),
        ..Default::default()
    }))
}

fn decide_adjustment(state: &LedgerState, delta: i64, reason: &str) -> AppResult<Decision> {
    let balance = state.balance();
    let new_total = balance.total + delta;
    if new_total < balance.used {
        return Err(AppError::Validation(format!(
            "adjustment would leave {new_total} credits against {} used",
            balance.used
        )));
    }

    Ok(Decision::Apply(Transition {
        account: Some(AccountWrite {
            total_credits: new_total,
            used_credits: balance.used,
            active_plan: active_plan(state),
        }),
        credit: Some(NewCreditTransaction {
            amount: delta,
            resulting_credits: new_total - balance.used,
            transaction_type: CreditTransactionType::ManualAdjust,
            description: reason.to_string(),
        }),
        ..Default::default()
    }))
}
