use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Origin of a subscription state transition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr, Display,
    EnumString,
)]
#[sqlx(type_name = "event_source", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    /// Delivered by the payment gateway
    External,
    /// Requested by the account holder or by housekeeping
    Internal,
}

/// Reasons recorded on subscription events.
pub mod reason {
    pub const FREE_PLAN_ACTIVATED: &str = "free_plan_activated";
    pub const TRIAL_STARTED: &str = "trial_started";
    pub const CHECKOUT_COMPLETED: &str = "checkout_completed";
    pub const SUBSCRIPTION_UPDATED: &str = "subscription_updated";
    pub const SUBSCRIPTION_DELETED: &str = "subscription_deleted";
    pub const INVOICE_PAID: &str = "invoice_paid";
    pub const INVOICE_PAYMENT_FAILED: &str = "invoice_payment_failed";
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    pub const RESUME_REQUESTED: &str = "resume_requested";
    pub const GRACE_PERIOD_ELAPSED: &str = "grace_period_elapsed";
    pub const TRIAL_ENDED: &str = "trial_ended";
    pub const GATEWAY_SYNC: &str = "gateway_sync";
}
