use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Plan tier an account can be subscribed to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr,
    Display, EnumString,
)]
#[sqlx(type_name = "plan_code", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PlanCode {
    #[default]
    Free,
    Basic,
    Pro,
    Premium,
}

impl PlanCode {
    /// Whether the plan is billed through the payment gateway
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanCode::Free)
    }

    pub fn paid() -> &'static [PlanCode] {
        &[PlanCode::Basic, PlanCode::Pro, PlanCode::Premium]
    }
}

/// Billing duration in whole months.
///
/// Serialized as the month count (`1`, `3`, `6`, `12`) so request bodies
/// can carry the duration the way the checkout UI presents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BillingDuration {
    #[default]
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
}

impl BillingDuration {
    pub fn months(&self) -> u32 {
        match self {
            BillingDuration::OneMonth => 1,
            BillingDuration::ThreeMonths => 3,
            BillingDuration::SixMonths => 6,
            BillingDuration::TwelveMonths => 12,
        }
    }

    pub fn from_months(months: u32) -> Option<Self> {
        match months {
            1 => Some(BillingDuration::OneMonth),
            3 => Some(BillingDuration::ThreeMonths),
            6 => Some(BillingDuration::SixMonths),
            12 => Some(BillingDuration::TwelveMonths),
            _ => None,
        }
    }

    pub fn all() -> &'static [BillingDuration] {
        &[
            BillingDuration::OneMonth,
            BillingDuration::ThreeMonths,
            BillingDuration::SixMonths,
            BillingDuration::TwelveMonths,
        ]
    }
}

impl TryFrom<u32> for BillingDuration {
    type Error = String;

    fn try_from(months: u32) -> Result<Self, Self::Error> {
        BillingDuration::from_months(months)
            .ok_or_else(|| format!("unsupported billing duration: {months} months"))
    }
}

impl From<BillingDuration> for u32 {
    fn from(duration: BillingDuration) -> Self {
        duration.months()
    }
}
