use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr, Display,
    EnumString,
)]
#[sqlx(type_name = "credit_transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditTransactionType {
    /// Fresh allotment for a billing period. Replaces the allowance and resets
    /// usage; the amount is the resulting change in remaining credits.
    Renewal,
    /// Allotment granted when a trial starts. Same balance effect as a renewal.
    TrialGrant,
    /// Signed correction of the allowance.
    ManualAdjust,
    /// Consumption. Amount is negative.
    Usage,
}

impl CreditTransactionType {
    pub fn is_grant(&self) -> bool {
        matches!(
            self,
            CreditTransactionType::Renewal | CreditTransactionType::TrialGrant
        )
    }
}

/// The `(total, used)` pair held on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditBalance {
    pub total: i64,
    pub used: i64,
}

impl CreditBalance {
    pub fn new(total: i64, used: i64) -> Self {
        Self { total, used }
    }

    pub fn remaining(&self) -> i64 {
        self.total - self.used
    }

    /// Apply one ledger entry to the balance.
    pub fn apply(self, kind: CreditTransactionType, amount: i64) -> Self {
        match kind {
            CreditTransactionType::Renewal | CreditTransactionType::TrialGrant => Self {
                total: self.remaining() + amount,
                used: 0,
            },
            CreditTransactionType::ManualAdjust => Self {
                total: self.total + amount,
                used: self.used,
            },
            CreditTransactionType::Usage => Self {
                total: self.total,
                used: self.used - amount,
            },
        }
    }

    /// Usage limited to `[0, total]`.
    pub fn clamped(&self) -> Self {
        Self {
            total: self.total,
            used: self.used.clamp(0, self.total.max(0)),
        }
    }
}

/// Rebuild a balance by replaying ledger entries oldest first.
pub fn replay<I>(entries: I) -> CreditBalance
where
    I: IntoIterator<Item = (CreditTransactionType, i64)>,
{
    entries
        .into_iter()
        .fold(CreditBalance::default(), |balance, (kind, amount)| {
            balance.apply(kind, amount)
        })
}
