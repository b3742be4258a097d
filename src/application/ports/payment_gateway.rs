use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::plan::{BillingDuration, PlanCode},
};

// ============================================================================
// Port Types - Gateway-agnostic domain types
// ============================================================================

/// Unique identifier for a customer at the payment gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription at the payment gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the gateway needs to open a hosted checkout page
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub account_id: Uuid,
    pub customer_id: CustomerId,
    pub price_id: String,
    pub plan: PlanCode,
    pub duration: BillingDuration,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// Subscription as the gateway reports it. `status` keeps the gateway's vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySubscription {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub price_id: Option<String>,
}

// ============================================================================
// Domain Events - produced from verified webhook payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCompleted {
    pub event_id: String,
    pub session_id: String,
    /// Account the checkout was opened for (carried as the client reference)
    pub account_id: Option<Uuid>,
    pub customer_id: Option<CustomerId>,
    pub subscription_id: Option<SubscriptionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChanged {
    pub event_id: String,
    pub subscription: GatewaySubscription,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceEvent {
    pub event_id: String,
    pub invoice_id: String,
    pub customer_id: Option<CustomerId>,
    pub subscription_id: Option<SubscriptionId>,
    pub billing_reason: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

impl InvoiceEvent {
    /// Renewal invoices are the only ones that grant credits after checkout.
    pub fn is_renewal(&self) -> bool {
        self.billing_reason.as_deref() == Some("subscription_cycle")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionUpdated(SubscriptionChanged),
    SubscriptionDeleted(SubscriptionChanged),
    InvoicePaid(InvoiceEvent),
    InvoiceFailed(InvoiceEvent),
    /// Verified event of a type this service does not act on
    Unhandled { event_id: String, event_type: String },
}

impl DomainEvent {
    pub fn event_id(&self) -> &str {
        match self {
            DomainEvent::CheckoutCompleted(e) => &e.event_id,
            DomainEvent::SubscriptionUpdated(e) | DomainEvent::SubscriptionDeleted(e) => {
                &e.event_id
            }
            DomainEvent::InvoicePaid(e) | DomainEvent::InvoiceFailed(e) => &e.event_id,
            DomainEvent::Unhandled { event_id, .. } => event_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            DomainEvent::CheckoutCompleted(_) => "checkout_completed",
            DomainEvent::SubscriptionUpdated(_) => "subscription_updated",
            DomainEvent::SubscriptionDeleted(_) => "subscription_deleted",
            DomainEvent::InvoicePaid(_) => "invoice_paid",
            DomainEvent::InvoiceFailed(_) => "invoice_failed",
            DomainEvent::Unhandled { event_type, .. } => event_type,
        }
    }

    /// Natural key used to detect redelivery of the same event.
    ///
    /// Checkout completions are keyed by session and paid invoices by
    /// invoice so that a gateway re-emitting them under a new event id
    /// still applies once.
    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            DomainEvent::CheckoutCompleted(e) => Some(format!("checkout:{}", e.session_id)),
            DomainEvent::SubscriptionUpdated(e) | DomainEvent::SubscriptionDeleted(e) => {
                Some(format!("event:{}", e.event_id))
            }
            DomainEvent::InvoicePaid(e) => Some(format!("invoice_paid:{}", e.invoice_id)),
            DomainEvent::InvoiceFailed(e) => Some(format!("invoice_failed:{}", e.event_id)),
            DomainEvent::Unhandled { .. } => None,
        }
    }
}

// ============================================================================
// Payment Gateway Port
// ============================================================================

/// Isolates payment-gateway specifics from the reconciler.
///
/// Implementations never touch the ledger; they only translate calls and
/// produce typed [`DomainEvent`]s.
#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    async fn create_customer(&self, account_id: Uuid, email: Option<&str>)
    -> AppResult<CustomerId>;

    async fn create_checkout_session(&self, request: &CheckoutRequest)
    -> AppResult<CheckoutSession>;

    /// Verify the signature over the raw body and parse it.
    ///
    /// Returns `AppError::Signature` for any verification failure.
    fn verify_and_parse_webhook(
        &self,
        raw_body: &str,
        signature_header: &str,
    ) -> AppResult<DomainEvent>;

    /// `Ok(None)` when the gateway has no such subscription.
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<GatewaySubscription>>;

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        cancel_at_period_end: bool,
    ) -> AppResult<GatewaySubscription>;
}
