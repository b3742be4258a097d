//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    application::{
        plan_catalog::PlanCatalog,
        ports::payment_gateway::{CustomerId, GatewaySubscription, SubscriptionId},
        use_cases::ledger::{AccountRecord, SubscriptionRecord},
    },
    domain::entities::{
        plan::{BillingDuration, PlanCode},
        subscription_status::SubscriptionStatus,
    },
};

/// Catalog with the default credit grants and a price for every paid
/// plan and duration except PREMIUM for six months, named
/// `price_<plan>_<months>m`.
pub fn test_catalog() -> PlanCatalog {
    let mut catalog = PlanCatalog::default();
    for plan in PlanCode::paid() {
        for duration in BillingDuration::all() {
            if *plan == PlanCode::Premium && *duration == BillingDuration::SixMonths {
                continue;
            }
            let price_id = format!(
                "price_{}_{}m",
                plan.as_ref().to_lowercase(),
                duration.months()
            );
            catalog = catalog.with_price(*plan, *duration, price_id);
        }
    }
    catalog
}

/// Create a test account with no credits on the free plan.
pub fn create_test_account(
    account_id: Uuid,
    overrides: impl FnOnce(&mut AccountRecord),
) -> AccountRecord {
    let mut account = AccountRecord {
        id: account_id,
        total_credits: 0,
        used_credits: 0,
        active_plan: PlanCode::Free,
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut account);
    account
}

/// Create a test subscription in the middle of a 30 day period.
pub fn create_test_subscription(
    account_id: Uuid,
    overrides: impl FnOnce(&mut SubscriptionRecord),
) -> SubscriptionRecord {
    let now = Utc::now();
    let mut subscription = SubscriptionRecord {
        id: Uuid::new_v4(),
        account_id,
        plan: PlanCode::Free,
        status: SubscriptionStatus::Active,
        current_period_start: Some(now - Duration::days(1)),
        current_period_end: Some(now + Duration::days(29)),
        cancel_at_period_end: false,
        trial_end: None,
        external_customer_id: None,
        external_subscription_id: None,
        external_price_id: None,
        last_external_status: None,
        last_external_event_type: None,
        canceled_at: None,
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut subscription);
    subscription
}

/// Create an active gateway subscription for customer `cus_1`.
pub fn create_gateway_subscription(
    overrides: impl FnOnce(&mut GatewaySubscription),
) -> GatewaySubscription {
    let now = Utc::now();
    let mut subscription = GatewaySubscription {
        subscription_id: SubscriptionId::new("sub_test"),
        customer_id: CustomerId::new("cus_1"),
        status: "active".to_string(),
        current_period_start: Some(now),
        current_period_end: Some(now + Duration::days(30)),
        cancel_at_period_end: false,
        canceled_at: None,
        trial_end: None,
        price_id: Some("price_basic_1m".to_string()),
    };
    overrides(&mut subscription);
    subscription
}

/// Fixed timestamp for rows whose creation time does not matter.
pub fn test_datetime() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}
