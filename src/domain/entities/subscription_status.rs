use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Internal subscription state.
///
/// `Canceled` is the grace state: the subscription stays usable until the
/// current period ends and then lapses to `Inactive`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr,
    Display, EnumString,
)]
#[sqlx(type_name = "subscription_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SubscriptionStatus {
    #[default]
    Inactive,
    Trial,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Map the gateway's status vocabulary onto internal states.
    ///
    /// An `active` subscription that is set to cancel at period end is the
    /// grace state locally.
    pub fn from_gateway(status: &str, cancel_at_period_end: bool) -> Self {
        match status {
            "active" if cancel_at_period_end => SubscriptionStatus::Canceled,
            "active" => SubscriptionStatus::Active,
            "past_due" | "unpaid" => SubscriptionStatus::PastDue,
            "trialing" => SubscriptionStatus::Trial,
            "canceled" | "incomplete" | "incomplete_expired" | "paused" => {
                SubscriptionStatus::Inactive
            }
            other => {
                tracing::warn!(gateway_status = other, "Unknown gateway subscription status");
                SubscriptionStatus::Inactive
            }
        }
    }

    /// Returns true if the plan's features are available to the account
    pub fn is_usable(&self) -> bool {
        !matches!(self, SubscriptionStatus::Inactive)
    }

    /// Returns true if the gateway is still billing this subscription
    pub fn is_billing(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trial | SubscriptionStatus::PastDue
        )
    }
}
