use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::payment_gateway::PaymentGatewayPort,
        use_cases::{ledger::TransitionOutcome, reconciler::Reconciler},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    /// Verified but nothing to apply; acknowledged so the gateway stops retrying
    Ignored(String),
}

/// Verifies inbound gateway webhooks and feeds them to the reconciler.
///
/// Errors returned from [`WebhookUseCases::handle`] are either signature
/// failures or retryable; everything else is acknowledged as ignored.
#[derive(Clone)]
pub struct WebhookUseCases {
    gateway: Arc<dyn PaymentGatewayPort>,
    reconciler: Arc<Reconciler>,
}

impl WebhookUseCases {
    pub fn new(gateway: Arc<dyn PaymentGatewayPort>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            gateway,
            reconciler,
        }
    }

    pub async fn handle(
        &self,
        raw_body: &str,
        signature_header: Option<&str>,
    ) -> AppResult<WebhookOutcome> {
        let Some(signature) = signature_header else {
            warn!(security_event = true, "Webhook rejected: missing signature");
            return Err(AppError::Signature("missing signature header".into()));
        };

        let event = match self.gateway.verify_and_parse_webhook(raw_body, signature) {
            Ok(event) => event,
            Err(e) => {
                warn!(security_event = true, error = %e, "Webhook rejected: signature verification failed");
                return Err(e);
            }
        };

        let event_id = event.event_id().to_string();
        let event_type = event.kind().to_string();

        match self.reconciler.apply_event(&event).await {
            Ok(TransitionOutcome::Applied(_)) => {
                info!(event_id, event_type, "Webhook processed");
                Ok(WebhookOutcome::Processed)
            }
            Ok(TransitionOutcome::Duplicate) => Ok(WebhookOutcome::Duplicate),
            Ok(TransitionOutcome::Skipped(reason)) => {
                info!(event_id, event_type, reason = %reason, "Webhook acknowledged without changes");
                Ok(WebhookOutcome::Ignored(reason))
            }
            Err(e) if e.is_retryable() => {
                error!(
                    error = %e,
                    event_id,
                    event_type,
                    retryable = true,
                    "Webhook processing failed, asking gateway to retry"
                );
                Err(e)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    event_id,
                    event_type,
                    retryable = false,
                    "Webhook processing failed, acknowledging without retry"
                );
                Ok(WebhookOutcome::Ignored(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::snapshot_cache::SnapshotCaches;
    use crate::test_utils::{
        InMemoryLedgerRepo, StubPaymentGateway, TEST_WEBHOOK_SECRET, create_gateway_subscription,
        sign_webhook, test_catalog,
    };
    use crate::application::ports::payment_gateway::SubscriptionId;
    use serde_json::json;
    use uuid::Uuid;

    fn use_cases(
        ledger: Arc<InMemoryLedgerRepo>,
        gateway: Arc<StubPaymentGateway>,
    ) -> WebhookUseCases {
        let reconciler = Arc::new(Reconciler::new(
            ledger,
            gateway.clone(),
            Arc::new(test_catalog()),
            Arc::new(SnapshotCaches::default()),
        ));
        WebhookUseCases::new(gateway, reconciler)
    }

    fn checkout_body(account_id: Uuid) -> String {
        json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "object": "checkout.session",
                "client_reference_id": account_id.to_string(),
                "customer": "cus_1",
                "subscription": "sub_1",
            }}
        })
        .to_string()
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let h = use_cases(
            Arc::new(InMemoryLedgerRepo::new()),
            Arc::new(StubPaymentGateway::new()),
        );
        let err = h.handle("{}", None).await.unwrap_err();
        assert!(matches!(err, AppError::Signature(_)));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_writes() {
        let ledger = Arc::new(InMemoryLedgerRepo::new());
        let h = use_cases(ledger.clone(), Arc::new(StubPaymentGateway::new()));
        let account_id = Uuid::new_v4();
        let body = checkout_body(account_id);
        let forged = sign_webhook(&body, "whsec_wrong");

        let err = h.handle(&body, Some(&forged)).await.unwrap_err();
        assert!(matches!(err, AppError::Signature(_)));
        assert!(ledger.account(account_id).is_none());
    }

    #[tokio::test]
    async fn signed_checkout_is_processed_once() {
        let ledger = Arc::new(InMemoryLedgerRepo::new());
        let gateway = Arc::new(StubPaymentGateway::new().with_subscription(
            create_gateway_subscription(|s| {
                s.subscription_id = SubscriptionId::new("sub_1");
                s.price_id = Some("price_premium_1m".into());
            }),
        ));
        let h = use_cases(ledger.clone(), gateway);
        let account_id = Uuid::new_v4();
        let body = checkout_body(account_id);
        let signature = sign_webhook(&body, TEST_WEBHOOK_SECRET);

        assert_eq!(
            h.handle(&body, Some(&signature)).await.unwrap(),
            WebhookOutcome::Processed
        );
        assert_eq!(
            h.handle(&body, Some(&signature)).await.unwrap(),
            WebhookOutcome::Duplicate
        );
        assert_eq!(ledger.account(account_id).unwrap().total_credits, 300);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_acknowledged() {
        let gateway = Arc::new(StubPaymentGateway::new().with_subscription(
            create_gateway_subscription(|s| {
                s.subscription_id = SubscriptionId::new("sub_1");
                s.price_id = Some("price_retired".into());
            }),
        ));
        let h = use_cases(Arc::new(InMemoryLedgerRepo::new()), gateway);
        let body = checkout_body(Uuid::new_v4());
        let signature = sign_webhook(&body, TEST_WEBHOOK_SECRET);

        let outcome = h.handle(&body, Some(&signature)).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn persistence_failure_is_retryable() {
        let ledger = Arc::new(InMemoryLedgerRepo::new());
        ledger.set_fail_writes(true);
        let gateway = Arc::new(StubPaymentGateway::new().with_subscription(
            create_gateway_subscription(|s| {
                s.subscription_id = SubscriptionId::new("sub_1");
                s.price_id = Some("price_basic_1m".into());
            }),
        ));
        let h = use_cases(ledger, gateway);
        let body = checkout_body(Uuid::new_v4());
        let signature = sign_webhook(&body, TEST_WEBHOOK_SECRET);

        let err = h.handle(&body, Some(&signature)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unhandled_event_type_is_ignored() {
        let h = use_cases(
            Arc::new(InMemoryLedgerRepo::new()),
            Arc::new(StubPaymentGateway::new()),
        );
        let body = json!({
            "id": "evt_x",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1" } }
        })
        .to_string();
        let signature = sign_webhook(&body, TEST_WEBHOOK_SECRET);

        let outcome = h.handle(&body, Some(&signature)).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
    }
}
