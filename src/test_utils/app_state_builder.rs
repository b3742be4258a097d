//! Test app state builder for HTTP-level integration testing.
//!
//! `TestAppStateBuilder` wires the real use cases to the in-memory ledger,
//! the stub gateway and a permissive rate limiter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use secrecy::SecretString;
use url::Url;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        jwt,
        plan_catalog::PlanCatalog,
        snapshot_cache::SnapshotCaches,
        use_cases::{
            ledger::{AccountRecord, SubscriptionRecord},
            reconciler::Reconciler,
            subscription::SubscriptionUseCases,
            webhook::WebhookUseCases,
        },
    },
    infra::{RateLimiterTrait, config::AppConfig},
    test_utils::{InMemoryLedgerRepo, InMemoryRateLimiter, StubPaymentGateway, test_catalog},
};

pub const TEST_JWT_SECRET: &str = "test_jwt_secret";
pub const TEST_APP_ORIGIN: &str = "http://localhost:3000";

/// Signed access token for `account_id`, as the auth service would mint it.
pub fn test_token(account_id: Uuid, admin: bool) -> String {
    jwt::issue(
        account_id,
        admin,
        &SecretString::from(TEST_JWT_SECRET.to_string()),
        time::Duration::hours(1),
    )
    .unwrap()
}

/// Builder for creating `AppState` with in-memory mocks for testing.
///
/// # Example
///
/// ```ignore
/// let account = create_test_account(id, |a| a.total_credits = 50);
///
/// let (app_state, ledger, gateway) = TestAppStateBuilder::new()
///     .with_account(account)
///     .build_with_mocks();
/// ```
pub struct TestAppStateBuilder {
    ledger: InMemoryLedgerRepo,
    gateway: StubPaymentGateway,
    catalog: PlanCatalog,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            ledger: InMemoryLedgerRepo::new(),
            gateway: StubPaymentGateway::new(),
            catalog: test_catalog(),
        }
    }

    pub fn with_account(mut self, account: AccountRecord) -> Self {
        self.ledger = self.ledger.with_account(account);
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionRecord) -> Self {
        self.ledger = self.ledger.with_subscription(subscription);
        self
    }

    /// Replace the stub gateway (e.g. one with remote subscriptions or a failing one).
    pub fn with_gateway(mut self, gateway: StubPaymentGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Build the AppState with all configured mocks.
    pub fn build(self) -> AppState {
        self.build_with_mocks().0
    }

    /// Returns the in-memory ledger and stub gateway alongside the state for assertions.
    pub fn build_with_mocks(self) -> (AppState, Arc<InMemoryLedgerRepo>, Arc<StubPaymentGateway>) {
        let ledger = Arc::new(self.ledger);
        let gateway = Arc::new(self.gateway);
        let catalog = Arc::new(self.catalog.clone());
        let caches = Arc::new(SnapshotCaches::default());

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            gateway.clone(),
            catalog.clone(),
            caches.clone(),
        ));

        let subscription_use_cases = Arc::new(SubscriptionUseCases::new(
            reconciler.clone(),
            ledger.clone(),
            gateway.clone(),
            catalog,
            caches.clone(),
            TEST_APP_ORIGIN.to_string(),
        ));
        let webhook_use_cases = Arc::new(WebhookUseCases::new(gateway.clone(), reconciler));

        // Create minimal config for testing
        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
            database_url: String::new(),
            redis_url: String::new(),
            rate_limit_window_secs: 60,
            rate_limit_per_ip: 120,
            rate_limit_per_account: 60,
            trust_proxy: false,
            jwt_secret: SecretString::from(TEST_JWT_SECRET.to_string()),
            app_origin: Url::parse(TEST_APP_ORIGIN).unwrap(),
            cors_origin: HeaderValue::from_static(TEST_APP_ORIGIN),
            stripe_secret_key: SecretString::from("sk_test".to_string()),
            stripe_webhook_secret: SecretString::from(
                crate::test_utils::TEST_WEBHOOK_SECRET.to_string(),
            ),
            stripe_webhook_tolerance_secs: 300,
            plan_catalog: self.catalog,
            snapshot_cache_ttl: Duration::from_secs(300),
            usage_cache_ttl: Duration::from_secs(30),
            cache_sweep_interval: Duration::from_secs(60),
        });

        let rate_limiter: Arc<dyn RateLimiterTrait> = Arc::new(InMemoryRateLimiter::permissive());

        let app_state = AppState {
            config,
            subscription_use_cases,
            webhook_use_cases,
            caches,
            rate_limiter,
        };

        (app_state, ledger, gateway)
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
