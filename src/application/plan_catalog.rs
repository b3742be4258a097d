use std::collections::HashMap;

use chrono::Duration;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::plan::{BillingDuration, PlanCode},
};

pub const DEFAULT_FREE_CREDITS: i64 = 50;
pub const DEFAULT_FREE_PERIOD_DAYS: i64 = 30;
pub const DEFAULT_TRIAL_DAYS: i64 = 7;

/// Static mapping of plans to external prices and credit grants.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free_credits: i64,
    free_period_days: i64,
    trial_days: i64,
    monthly_credits: HashMap<PlanCode, i64>,
    prices: HashMap<(PlanCode, BillingDuration), String>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_FREE_CREDITS, DEFAULT_FREE_PERIOD_DAYS, DEFAULT_TRIAL_DAYS)
            .with_monthly_credits(PlanCode::Basic, 25)
            .with_monthly_credits(PlanCode::Pro, 100)
            .with_monthly_credits(PlanCode::Premium, 300)
    }
}

impl PlanCatalog {
    pub fn new(free_credits: i64, free_period_days: i64, trial_days: i64) -> Self {
        Self {
            free_credits,
            free_period_days,
            trial_days,
            monthly_credits: HashMap::new(),
            prices: HashMap::new(),
        }
    }

    pub fn with_monthly_credits(mut self, plan: PlanCode, credits: i64) -> Self {
        self.monthly_credits.insert(plan, credits);
        self
    }

    pub fn with_price(
        mut self,
        plan: PlanCode,
        duration: BillingDuration,
        price_id: impl Into<String>,
    ) -> Self {
        self.prices.insert((plan, duration), price_id.into());
        self
    }

    pub fn free_credits(&self) -> i64 {
        self.free_credits
    }

    pub fn free_period(&self) -> Duration {
        Duration::days(self.free_period_days)
    }

    pub fn trial_period(&self) -> Duration {
        Duration::days(self.trial_days)
    }

    pub fn monthly_credits(&self, plan: PlanCode) -> i64 {
        match plan {
            PlanCode::Free => self.free_credits,
            paid => self.monthly_credits.get(&paid).copied().unwrap_or(0),
        }
    }

    /// Credits granted for one billing cycle of `plan` bought for `duration`.
    pub fn grant_for(&self, plan: PlanCode, duration: BillingDuration) -> i64 {
        match plan {
            PlanCode::Free => self.free_credits,
            paid => self.monthly_credits(paid) * i64::from(duration.months()),
        }
    }

    /// Credits granted when a trial of `plan` starts (one month's worth).
    pub fn trial_grant(&self, plan: PlanCode) -> AppResult<i64> {
        if !plan.is_paid() {
            return Err(AppError::Validation("free plan has no trial".into()));
        }
        Ok(self.monthly_credits(plan))
    }

    pub fn price_id(&self, plan: PlanCode, duration: BillingDuration) -> AppResult<&str> {
        if !plan.is_paid() {
            return Err(AppError::Validation("free plan has no price".into()));
        }
        self.prices
            .get(&(plan, duration))
            .map(String::as_str)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "plan {} is not offered for {} months",
                    plan,
                    duration.months()
                ))
            })
    }

    /// Reverse lookup of an external price id.
    pub fn resolve_price(&self, price_id: &str) -> Option<(PlanCode, BillingDuration)> {
        self.prices
            .iter()
            .find(|(_, id)| id.as_str() == price_id)
            .map(|(key, _)| *key)
    }
}
