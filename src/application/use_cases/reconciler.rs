use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        plan_catalog::PlanCatalog,
        ports::payment_gateway::{
            CheckoutCompleted, DomainEvent, GatewaySubscription, InvoiceEvent, PaymentGatewayPort,
            SubscriptionChanged, SubscriptionId,
        },
        snapshot_cache::SnapshotCaches,
        use_cases::ledger::{
            AccountWrite, Decide, Decision, LedgerRepo, LedgerState, NewCreditTransaction,
            NewSubscriptionEvent, SubscriptionRecord, SubscriptionWrite, Transition,
            TransitionOutcome,
        },
    },
    domain::entities::{
        credit_transaction::CreditTransactionType,
        plan::{BillingDuration, PlanCode},
        subscription_event::{EventSource, reason},
        subscription_status::SubscriptionStatus,
    },
};

/// Subscription state machine.
///
/// Every operation is one ledger transaction for one account. Operations
/// that call the gateway do so before the transaction so a gateway failure
/// leaves nothing behind.
pub struct Reconciler {
    ledger: Arc<dyn LedgerRepo>,
    gateway: Arc<dyn PaymentGatewayPort>,
    catalog: Arc<PlanCatalog>,
    caches: Arc<SnapshotCaches>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerRepo>,
        gateway: Arc<dyn PaymentGatewayPort>,
        catalog: Arc<PlanCatalog>,
        caches: Arc<SnapshotCaches>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            catalog,
            caches,
        }
    }

    async fn commit(
        &self,
        account_id: Uuid,
        idempotency_key: Option<&str>,
        operation: &str,
        decide: Decide<'_>,
    ) -> AppResult<TransitionOutcome> {
        let outcome = self
            .ledger
            .transact(account_id, idempotency_key, decide)
            .await?;

        match &outcome {
            TransitionOutcome::Applied(state) => {
                self.caches.invalidate(account_id);
                info!(
                    %account_id,
                    operation,
                    idempotency_key,
                    new_status = %state.status(),
                    "Subscription transition applied"
                );
            }
            TransitionOutcome::Duplicate => {
                info!(%account_id, operation, idempotency_key, "Duplicate delivery ignored");
            }
            TransitionOutcome::Skipped(why) => {
                debug!(%account_id, operation, reason = %why, "Transition skipped");
            }
        }
        Ok(outcome)
    }

    // ========================================================================
    // Internal Commands
    // ========================================================================

    pub async fn activate_free(&self, account_id: Uuid) -> AppResult<TransitionOutcome> {
        let now = Utc::now();
        let catalog = &*self.catalog;
        let decide = move |state: &LedgerState| decide_activate_free(state, catalog, now);
        self.commit(account_id, None, "activate_free", &decide)
            .await
    }

    pub async fn start_trial(
        &self,
        account_id: Uuid,
        plan: PlanCode,
    ) -> AppResult<TransitionOutcome> {
        // Rejected before touching the ledger.
        self.catalog.trial_grant(plan)?;

        let now = Utc::now();
        let catalog = &*self.catalog;
        let decide = move |state: &LedgerState| decide_start_trial(state, catalog, plan, now);
        self.commit(account_id, None, "start_trial", &decide).await
    }

    pub async fn cancel(&self, account_id: Uuid) -> AppResult<TransitionOutcome> {
        let state = self.ledger.load_state(account_id).await?;
        let sub = state.subscription.as_ref().ok_or(AppError::NotFound)?;
        check_cancelable(sub)?;

        if let Some(external_id) = &sub.external_subscription_id {
            self.gateway
                .set_cancel_at_period_end(&SubscriptionId::new(external_id), true)
                .await?;
        }

        let decide = |state: &LedgerState| decide_cancel(state);
        self.commit(account_id, None, "cancel", &decide).await
    }

    pub async fn resume(&self, account_id: Uuid) -> AppResult<TransitionOutcome> {
        let now = Utc::now();
        let state = self.ledger.load_state(account_id).await?;
        let sub = state.subscription.as_ref().ok_or(AppError::NotFound)?;
        check_resumable(sub, now)?;

        if let Some(external_id) = &sub.external_subscription_id {
            self.gateway
                .set_cancel_at_period_end(&SubscriptionId::new(external_id), false)
                .await?;
        }

        let decide = move |state: &LedgerState| decide_resume(state, now);
        self.commit(account_id, None, "resume", &decide).await
    }

    /// Move grace-period and trial subscriptions whose time ran out to INACTIVE.
    pub async fn expire_lapsed(&self, account_id: Uuid) -> AppResult<TransitionOutcome> {
        let now = Utc::now();
        let state = self.ledger.load_state(account_id).await?;
        if let Decision::Skip(why) = decide_expire_lapsed(&state, now)? {
            return Ok(TransitionOutcome::Skipped(why));
        }

        let decide = move |state: &LedgerState| decide_expire_lapsed(state, now);
        self.commit(account_id, None, "expire_lapsed", &decide)
            .await
    }

    /// Pull the gateway's view of the account's subscription and apply it.
    pub async fn sync_from_gateway(&self, account_id: Uuid) -> AppResult<TransitionOutcome> {
        let state = self.ledger.load_state(account_id).await?;
        let Some(external_id) = state
            .subscription
            .as_ref()
            .and_then(|s| s.external_subscription_id.clone())
        else {
            return Ok(TransitionOutcome::Skipped(
                "no gateway subscription to sync".into(),
            ));
        };

        let Some(remote) = self
            .gateway
            .get_subscription(&SubscriptionId::new(&external_id))
            .await?
        else {
            warn!(%account_id, external_subscription_id = %external_id, "Gateway has no record of subscription");
            return Ok(TransitionOutcome::Skipped(
                "gateway has no record of subscription".into(),
            ));
        };

        let plan = self.plan_for_price(remote.price_id.as_deref());
        let metadata = json!({ "external_status": remote.status });
        let update = GatewayUpdate {
            remote: &remote,
            plan,
            event_type: None,
            reason: reason::GATEWAY_SYNC,
            metadata: &metadata,
            skip_if_unchanged: true,
        };
        let decide = |state: &LedgerState| decide_gateway_update(state, &update);
        self.commit(account_id, None, "sync_from_gateway", &decide)
            .await
    }

    // ========================================================================
    // Gateway Events
    // ========================================================================

    pub async fn apply_event(&self, event: &DomainEvent) -> AppResult<TransitionOutcome> {
        let key = event.idempotency_key();

        // Cheap pre-check; the transaction re-checks under the account lock.
        if let Some(key) = key.as_deref()
            && self.ledger.is_applied(key).await?
        {
            info!(event_id = event.event_id(), idempotency_key = key, "Event already applied");
            return Ok(TransitionOutcome::Duplicate);
        }

        match event {
            DomainEvent::CheckoutCompleted(checkout) => {
                self.checkout_completed(checkout, key.as_deref()).await
            }
            DomainEvent::SubscriptionUpdated(changed) => {
                self.subscription_updated(changed, event.kind(), key.as_deref())
                    .await
            }
            DomainEvent::SubscriptionDeleted(changed) => {
                self.subscription_deleted(changed, event.kind(), key.as_deref())
                    .await
            }
            DomainEvent::InvoicePaid(invoice) => {
                self.invoice_paid(invoice, event.kind(), key.as_deref())
                    .await
            }
            DomainEvent::InvoiceFailed(invoice) => {
                self.invoice_failed(invoice, event.kind(), key.as_deref())
                    .await
            }
            DomainEvent::Unhandled {
                event_id,
                event_type,
            } => {
                debug!(event_id, event_type, "Unhandled gateway event type");
                Ok(TransitionOutcome::Skipped(format!(
                    "unhandled event type {event_type}"
                )))
            }
        }
    }

    async fn checkout_completed(
        &self,
        checkout: &CheckoutCompleted,
        key: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let Some(subscription_id) = &checkout.subscription_id else {
            debug!(event_id = %checkout.event_id, "Checkout completed without a subscription");
            return Ok(TransitionOutcome::Skipped(
                "checkout without subscription".into(),
            ));
        };

        let account_id = match (checkout.account_id, &checkout.customer_id) {
            (Some(id), _) => Some(id),
            (None, Some(customer)) => {
                self.ledger
                    .find_account_by_external_customer(customer.as_str())
                    .await?
            }
            (None, None) => None,
        };
        let Some(account_id) = account_id else {
            warn!(event_id = %checkout.event_id, session_id = %checkout.session_id, "Checkout for unknown account");
            return Ok(TransitionOutcome::Skipped(
                "checkout for unknown account".into(),
            ));
        };

        // Period bounds and price only live on the gateway subscription.
        let remote = self
            .gateway
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                AppError::ExternalGateway(format!(
                    "subscription {subscription_id} not found at gateway"
                ))
            })?;
        let price_id = remote.price_id.as_deref().ok_or_else(|| {
            AppError::Validation(format!("subscription {subscription_id} has no price"))
        })?;
        let (plan, duration) = self
            .catalog
            .resolve_price(price_id)
            .ok_or_else(|| AppError::Validation(format!("unknown price {price_id}")))?;
        let credits = self.catalog.grant_for(plan, duration);

        let decide = |state: &LedgerState| {
            decide_checkout_completed(state, checkout, &remote, plan, duration, credits)
        };
        self.commit(account_id, key, "checkout_completed", &decide)
            .await
    }

    async fn subscription_updated(
        &self,
        changed: &SubscriptionChanged,
        event_type: &str,
        key: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let Some(account_id) = self.account_for_remote(&changed.subscription).await? else {
            return Ok(unknown_subscription(&changed.event_id));
        };

        let plan = self.plan_for_price(changed.subscription.price_id.as_deref());
        let metadata = json!({
            "event_id": changed.event_id,
            "external_status": changed.subscription.status,
        });
        let update = GatewayUpdate {
            remote: &changed.subscription,
            plan,
            event_type: Some(event_type),
            reason: reason::SUBSCRIPTION_UPDATED,
            metadata: &metadata,
            skip_if_unchanged: false,
        };
        let decide = |state: &LedgerState| decide_gateway_update(state, &update);
        self.commit(account_id, key, "subscription_updated", &decide)
            .await
    }

    async fn subscription_deleted(
        &self,
        changed: &SubscriptionChanged,
        event_type: &str,
        key: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let Some(account_id) = self.account_for_remote(&changed.subscription).await? else {
            return Ok(unknown_subscription(&changed.event_id));
        };

        let now = Utc::now();
        let decide = |state: &LedgerState| {
            decide_subscription_deleted(state, changed, event_type, now)
        };
        self.commit(account_id, key, "subscription_deleted", &decide)
            .await
    }

    async fn invoice_paid(
        &self,
        invoice: &InvoiceEvent,
        event_type: &str,
        key: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let Some(account_id) = self.account_for_invoice(invoice).await? else {
            return Ok(unknown_subscription(&invoice.event_id));
        };

        let catalog = &*self.catalog;
        let decide =
            |state: &LedgerState| decide_invoice_paid(state, invoice, event_type, catalog);
        self.commit(account_id, key, "invoice_paid", &decide).await
    }

    async fn invoice_failed(
        &self,
        invoice: &InvoiceEvent,
        event_type: &str,
        key: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let Some(account_id) = self.account_for_invoice(invoice).await? else {
            return Ok(unknown_subscription(&invoice.event_id));
        };

        let decide = |state: &LedgerState| decide_invoice_failed(state, invoice, event_type);
        self.commit(account_id, key, "invoice_failed", &decide)
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn plan_for_price(&self, price_id: Option<&str>) -> Option<PlanCode> {
        price_id
            .and_then(|p| self.catalog.resolve_price(p))
            .map(|(plan, _)| plan)
    }

    async fn account_for_remote(&self, remote: &GatewaySubscription) -> AppResult<Option<Uuid>> {
        if let Some(id) = self
            .ledger
            .find_account_by_external_subscription(remote.subscription_id.as_str())
            .await?
        {
            return Ok(Some(id));
        }
        self.ledger
            .find_account_by_external_customer(remote.customer_id.as_str())
            .await
    }

    /// Invoices carrying a subscription id are only matched by that id so a
    /// stale subscription's invoice never lands on the customer's newer one.
    async fn account_for_invoice(&self, invoice: &InvoiceEvent) -> AppResult<Option<Uuid>> {
        match (&invoice.subscription_id, &invoice.customer_id) {
            (Some(sub), _) => {
                self.ledger
                    .find_account_by_external_subscription(sub.as_str())
                    .await
            }
            (None, Some(customer)) => {
                self.ledger
                    .find_account_by_external_customer(customer.as_str())
                    .await
            }
            (None, None) => Ok(None),
        }
    }
}

fn unknown_subscription(event_id: &str) -> TransitionOutcome {
    warn!(event_id, retryable = false, "Gateway event for unknown subscription");
    TransitionOutcome::Skipped("event for unknown subscription".into())
}

// ============================================================================
// Transition Functions
// ============================================================================

/// Ledger row for a fresh allotment of `credits`. The amount is the change in
/// remaining credits, since a grant also clears usage.
fn grant(
    state: &LedgerState,
    credits: i64,
    kind: CreditTransactionType,
    description: String,
) -> NewCreditTransaction {
    NewCreditTransaction {
        amount: credits - state.balance().remaining(),
        resulting_credits: credits,
        transaction_type: kind,
        description,
    }
}

fn event(
    previous: Option<SubscriptionStatus>,
    new_status: SubscriptionStatus,
    reason: &str,
    source: EventSource,
    metadata: serde_json::Value,
) -> NewSubscriptionEvent {
    NewSubscriptionEvent {
        previous_status: previous,
        new_status,
        reason: reason.to_string(),
        source,
        metadata,
    }
}

fn same_external_subscription(sub: &SubscriptionRecord, id: &SubscriptionId) -> bool {
    sub.external_subscription_id.as_deref() == Some(id.as_str())
}

fn decide_activate_free(
    state: &LedgerState,
    catalog: &PlanCatalog,
    now: DateTime<Utc>,
) -> AppResult<Decision> {
    if let Some(sub) = &state.subscription {
        // A FREE/ACTIVE period is only ever written together with its grant,
        // so a renewal on record means this period has been paid out. The
        // renewal's timestamp comes from the store's clock and is not compared
        // against the period bounds.
        if sub.plan == PlanCode::Free
            && sub.status == SubscriptionStatus::Active
            && sub.current_period_end.is_some_and(|end| end > now)
            && state.latest_renewal_at.is_some()
        {
            return Ok(Decision::Skip(
                "free plan already granted for current period".into(),
            ));
        }

        // Switching to free must not orphan a subscription the gateway still bills.
        if sub.plan.is_paid() && sub.status.is_billing() && sub.external_subscription_id.is_some()
        {
            return Err(AppError::AlreadySubscribed);
        }
    }

    let previous = state.subscription.as_ref().map(|s| s.status);
    let mut write = state
        .subscription
        .as_ref()
        .map(SubscriptionWrite::from_record)
        .unwrap_or_else(|| SubscriptionWrite::new(PlanCode::Free, SubscriptionStatus::Active));
    write.plan = PlanCode::Free;
    write.status = SubscriptionStatus::Active;
    write.current_period_start = Some(now);
    write.current_period_end = Some(now + catalog.free_period());
    write.cancel_at_period_end = false;
    write.trial_end = None;
    write.canceled_at = None;
    write.external_subscription_id = None;
    write.external_price_id = None;

    let credits = catalog.free_credits();
    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account: Some(AccountWrite {
            total_credits: credits,
            used_credits: 0,
            active_plan: PlanCode::Free,
        }),
        credit: Some(grant(
            state,
            credits,
            CreditTransactionType::Renewal,
            "Free plan allotment".into(),
        )),
        event: Some(event(
            previous,
            SubscriptionStatus::Active,
            reason::FREE_PLAN_ACTIVATED,
            EventSource::Internal,
            json!({ "credits_granted": credits }),
        )),
    }))
}

fn decide_start_trial(
    state: &LedgerState,
    catalog: &PlanCatalog,
    plan: PlanCode,
    now: DateTime<Utc>,
) -> AppResult<Decision> {
    if state.subscription.is_some() {
        return Err(AppError::AlreadySubscribed);
    }

    let credits = catalog.trial_grant(plan)?;
    let trial_end = now + catalog.trial_period();

    let mut write = SubscriptionWrite::new(plan, SubscriptionStatus::Trial);
    write.current_period_start = Some(now);
    write.current_period_end = Some(trial_end);
    write.trial_end = Some(trial_end);

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account: Some(AccountWrite {
            total_credits: credits,
            used_credits: 0,
            active_plan: plan,
        }),
        credit: Some(grant(
            state,
            credits,
            CreditTransactionType::TrialGrant,
            format!("{plan} trial"),
        )),
        event: Some(event(
            None,
            SubscriptionStatus::Trial,
            reason::TRIAL_STARTED,
            EventSource::Internal,
            json!({ "credits_granted": credits, "trial_end": trial_end }),
        )),
    }))
}

fn decide_checkout_completed(
    state: &LedgerState,
    checkout: &CheckoutCompleted,
    remote: &GatewaySubscription,
    plan: PlanCode,
    duration: BillingDuration,
    credits: i64,
) -> AppResult<Decision> {
    let previous = state.subscription.as_ref().map(|s| s.status);
    let mut write = state
        .subscription
        .as_ref()
        .map(SubscriptionWrite::from_record)
        .unwrap_or_else(|| SubscriptionWrite::new(plan, SubscriptionStatus::Active));
    write.plan = plan;
    write.status = SubscriptionStatus::Active;
    write.current_period_start = remote.current_period_start;
    write.current_period_end = remote.current_period_end;
    write.cancel_at_period_end = false;
    write.trial_end = None;
    write.canceled_at = None;
    write.external_customer_id = Some(remote.customer_id.to_string());
    write.external_subscription_id = Some(remote.subscription_id.to_string());
    write.external_price_id = remote.price_id.clone();
    write.last_external_status = Some(remote.status.clone());
    write.last_external_event_type = Some("checkout_completed".into());

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account: Some(AccountWrite {
            total_credits: credits,
            used_credits: 0,
            active_plan: plan,
        }),
        credit: Some(grant(
            state,
            credits,
            CreditTransactionType::Renewal,
            format!("{plan} plan, {} months", duration.months()),
        )),
        event: Some(event(
            previous,
            SubscriptionStatus::Active,
            reason::CHECKOUT_COMPLETED,
            EventSource::External,
            json!({
                "event_id": checkout.event_id,
                "session_id": checkout.session_id,
                "external_subscription_id": remote.subscription_id,
                "price_id": remote.price_id,
                "credits_granted": credits,
            }),
        )),
    }))
}

struct GatewayUpdate<'a> {
    remote: &'a GatewaySubscription,
    plan: Option<PlanCode>,
    /// `None` keeps the stored last event type (pulls are not events)
    event_type: Option<&'a str>,
    reason: &'a str,
    metadata: &'a serde_json::Value,
    skip_if_unchanged: bool,
}

/// Mirror the gateway's subscription onto the local row. No credit effects.
fn decide_gateway_update(state: &LedgerState, update: &GatewayUpdate<'_>) -> AppResult<Decision> {
    let remote = update.remote;
    let Some(sub) = &state.subscription else {
        return Ok(Decision::Skip("no local subscription".into()));
    };
    if !same_external_subscription(sub, &remote.subscription_id) {
        return Ok(Decision::Skip(
            "event for a different gateway subscription".into(),
        ));
    }

    let mapped = SubscriptionStatus::from_gateway(&remote.status, remote.cancel_at_period_end);
    if sub.status == SubscriptionStatus::Inactive && mapped != SubscriptionStatus::Inactive {
        // Deletion is terminal. A late update must not resurrect it.
        return Ok(Decision::Skip("subscription already ended".into()));
    }

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = mapped;
    if let Some(plan) = update.plan {
        write.plan = plan;
    }
    write.current_period_start = remote.current_period_start.or(write.current_period_start);
    write.current_period_end = remote.current_period_end.or(write.current_period_end);
    write.cancel_at_period_end = remote.cancel_at_period_end;
    write.trial_end = remote.trial_end;
    write.canceled_at = remote.canceled_at.or(write.canceled_at);
    write.external_price_id = remote.price_id.clone().or(write.external_price_id);
    write.last_external_status = Some(remote.status.clone());
    if let Some(event_type) = update.event_type {
        write.last_external_event_type = Some(event_type.to_string());
    }

    if update.skip_if_unchanged && write.matches(sub) {
        return Ok(Decision::Skip("already in sync with gateway".into()));
    }

    // Plan changes made at the gateway move the account's plan, not its credits.
    let account = state
        .account
        .as_ref()
        .filter(|a| a.active_plan != write.plan)
        .map(|a| AccountWrite {
            total_credits: a.total_credits,
            used_credits: a.used_credits,
            active_plan: write.plan,
        });

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account,
        credit: None,
        event: Some(event(
            Some(sub.status),
            mapped,
            update.reason,
            EventSource::External,
            update.metadata.clone(),
        )),
    }))
}

fn decide_subscription_deleted(
    state: &LedgerState,
    changed: &SubscriptionChanged,
    event_type: &str,
    now: DateTime<Utc>,
) -> AppResult<Decision> {
    let Some(sub) = &state.subscription else {
        return Ok(Decision::Skip("no local subscription".into()));
    };
    if !same_external_subscription(sub, &changed.subscription.subscription_id) {
        return Ok(Decision::Skip(
            "event for a different gateway subscription".into(),
        ));
    }

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::Inactive;
    write.cancel_at_period_end = false;
    write.canceled_at = Some(now);
    write.last_external_status = Some(changed.subscription.status.clone());
    write.last_external_event_type = Some(event_type.to_string());

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account: None,
        credit: None,
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::Inactive,
            reason::SUBSCRIPTION_DELETED,
            EventSource::External,
            json!({ "event_id": changed.event_id }),
        )),
    }))
}

fn decide_invoice_paid(
    state: &LedgerState,
    invoice: &InvoiceEvent,
    event_type: &str,
    catalog: &PlanCatalog,
) -> AppResult<Decision> {
    let Some(sub) = &state.subscription else {
        return Ok(Decision::Skip("no local subscription".into()));
    };
    if let Some(id) = &invoice.subscription_id
        && !same_external_subscription(sub, id)
    {
        return Ok(Decision::Skip(
            "invoice for a different gateway subscription".into(),
        ));
    }
    if !sub.status.is_billing() {
        return Ok(Decision::Skip(format!(
            "invoice paid for {} subscription",
            sub.status
        )));
    }

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::Active;
    write.current_period_start = invoice.period_start.or(write.current_period_start);
    write.current_period_end = invoice.period_end.or(write.current_period_end);
    write.last_external_event_type = Some(event_type.to_string());

    // Initial payments were already granted at checkout; only cycles grant here.
    let (account, credit, credits_granted) = if invoice.is_renewal() {
        let (plan, duration) = sub
            .external_price_id
            .as_deref()
            .and_then(|p| catalog.resolve_price(p))
            .unwrap_or((sub.plan, BillingDuration::OneMonth));
        let credits = catalog.grant_for(plan, duration);
        write.plan = plan;
        (
            Some(AccountWrite {
                total_credits: credits,
                used_credits: 0,
                active_plan: plan,
            }),
            Some(grant(
                state,
                credits,
                CreditTransactionType::Renewal,
                format!("{plan} plan renewal"),
            )),
            credits,
        )
    } else {
        (None, None, 0)
    };

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account,
        credit,
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::Active,
            reason::INVOICE_PAID,
            EventSource::External,
            json!({
                "event_id": invoice.event_id,
                "invoice_id": invoice.invoice_id,
                "billing_reason": invoice.billing_reason,
                "credits_granted": credits_granted,
            }),
        )),
    }))
}

fn decide_invoice_failed(
    state: &LedgerState,
    invoice: &InvoiceEvent,
    event_type: &str,
) -> AppResult<Decision> {
    let Some(sub) = &state.subscription else {
        return Ok(Decision::Skip("no local subscription".into()));
    };
    if let Some(id) = &invoice.subscription_id
        && !same_external_subscription(sub, id)
    {
        return Ok(Decision::Skip(
            "invoice for a different gateway subscription".into(),
        ));
    }
    if !sub.status.is_billing() {
        return Ok(Decision::Skip(format!(
            "invoice failed for {} subscription",
            sub.status
        )));
    }

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::PastDue;
    write.last_external_event_type = Some(event_type.to_string());

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        account: None,
        credit: None,
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::PastDue,
            reason::INVOICE_PAYMENT_FAILED,
            EventSource::External,
            json!({
                "event_id": invoice.event_id,
                "invoice_id": invoice.invoice_id,
            }),
        )),
    }))
}

fn check_cancelable(sub: &SubscriptionRecord) -> AppResult<()> {
    if !sub.plan.is_paid() {
        return Err(AppError::NotCancelable("free plan has nothing to cancel".into()));
    }
    if sub.status != SubscriptionStatus::Active {
        return Err(AppError::NotCancelable(format!(
            "subscription is {}",
            sub.status
        )));
    }
    Ok(())
}

fn check_resumable(sub: &SubscriptionRecord, now: DateTime<Utc>) -> AppResult<()> {
    if sub.status != SubscriptionStatus::Canceled || !sub.cancel_at_period_end {
        return Err(AppError::NotCancelable("no cancellation is pending".into()));
    }
    if sub.current_period_end.is_some_and(|end| end <= now) {
        return Err(AppError::NotCancelable(
            "billing period already ended".into(),
        ));
    }
    Ok(())
}

fn decide_cancel(state: &LedgerState) -> AppResult<Decision> {
    let sub = state.subscription.as_ref().ok_or(AppError::NotFound)?;
    check_cancelable(sub)?;

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::Canceled;
    write.cancel_at_period_end = true;

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::Canceled,
            reason::CANCEL_REQUESTED,
            EventSource::Internal,
            json!({ "current_period_end": sub.current_period_end }),
        )),
        ..Default::default()
    }))
}

fn decide_resume(state: &LedgerState, now: DateTime<Utc>) -> AppResult<Decision> {
    let sub = state.subscription.as_ref().ok_or(AppError::NotFound)?;
    check_resumable(sub, now)?;

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::Active;
    write.cancel_at_period_end = false;

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::Active,
            reason::RESUME_REQUESTED,
            EventSource::Internal,
            json!({}),
        )),
        ..Default::default()
    }))
}

fn decide_expire_lapsed(state: &LedgerState, now: DateTime<Utc>) -> AppResult<Decision> {
    let Some(sub) = &state.subscription else {
        return Ok(Decision::Skip("no subscription".into()));
    };

    let lapse_reason = match sub.status {
        SubscriptionStatus::Canceled if sub.current_period_end.is_some_and(|end| end <= now) => {
            reason::GRACE_PERIOD_ELAPSED
        }
        // Gateway-managed trials end through webhooks.
        SubscriptionStatus::Trial
            if sub.external_subscription_id.is_none()
                && sub.trial_end.is_some_and(|end| end <= now) =>
        {
            reason::TRIAL_ENDED
        }
        _ => return Ok(Decision::Skip("nothing has lapsed".into())),
    };

    let mut write = SubscriptionWrite::from_record(sub);
    write.status = SubscriptionStatus::Inactive;
    write.cancel_at_period_end = false;
    write.canceled_at = write.canceled_at.or(Some(now));

    Ok(Decision::Apply(Transition {
        subscription: Some(write),
        event: Some(event(
            Some(sub.status),
            SubscriptionStatus::Inactive,
            lapse_reason,
            EventSource::Internal,
            json!({}),
        )),
        ..Default::default()
    }))
}
