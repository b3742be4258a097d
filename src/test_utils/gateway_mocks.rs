//! Payment gateway stub that records calls and serves configured subscriptions.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_gateway::{
        CheckoutRequest, CheckoutSession, CustomerId, DomainEvent, GatewaySubscription,
        PaymentGatewayPort, SubscriptionId,
    },
    infra::stripe_gateway::parse_webhook_event,
    test_utils::create_gateway_subscription,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Sign `body` the way the gateway signs webhook deliveries.
pub fn sign_webhook(body: &str, secret: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={signature}")
}

#[derive(Default)]
pub struct StubPaymentGateway {
    subscriptions: Mutex<HashMap<String, GatewaySubscription>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    customers: Mutex<Vec<(Uuid, Option<String>)>>,
    cancel_calls: Mutex<Vec<(String, bool)>>,
    fail: AtomicBool,
}

impl StubPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(self, subscription: GatewaySubscription) -> Self {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.subscription_id.to_string(), subscription);
        self
    }

    /// Every API call fails with a gateway error. Webhook verification still works.
    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().unwrap().clone()
    }

    pub fn customers_created(&self) -> usize {
        self.customers.lock().unwrap().len()
    }

    pub fn cancel_calls(&self) -> Vec<(String, bool)> {
        self.cancel_calls.lock().unwrap().clone()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalGateway("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGatewayPort for StubPaymentGateway {
    async fn create_customer(
        &self,
        account_id: Uuid,
        email: Option<&str>,
    ) -> AppResult<CustomerId> {
        self.check_available()?;
        let mut customers = self.customers.lock().unwrap();
        customers.push((account_id, email.map(String::from)));
        Ok(CustomerId::new(format!("cus_stub_{}", customers.len())))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        self.check_available()?;
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());
        let session_id = format!("cs_stub_{}", checkouts.len());
        Ok(CheckoutSession {
            redirect_url: format!("https://checkout.test/pay/{session_id}"),
            session_id,
        })
    }

    fn verify_and_parse_webhook(
        &self,
        raw_body: &str,
        signature_header: &str,
    ) -> AppResult<DomainEvent> {
        parse_webhook_event(raw_body, signature_header, TEST_WEBHOOK_SECRET, 300)
    }

    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<GatewaySubscription>> {
        self.check_available()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_id.as_str())
            .cloned())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        cancel_at_period_end: bool,
    ) -> AppResult<GatewaySubscription> {
        self.check_available()?;
        self.cancel_calls
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), cancel_at_period_end));

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .entry(subscription_id.to_string())
            .or_insert_with(|| {
                create_gateway_subscription(|s| s.subscription_id = subscription_id.clone())
            });
        subscription.cancel_at_period_end = cancel_at_period_end;
        Ok(subscription.clone())
    }
}
