use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_gateway::{
        CheckoutCompleted, CheckoutRequest, CheckoutSession, CustomerId, DomainEvent,
        GatewaySubscription, InvoiceEvent, PaymentGatewayPort, SubscriptionChanged,
        SubscriptionId,
    },
    infra::stripe_client::{
        StripeCheckoutSession, StripeClient, StripeInvoice, StripeSubscription,
        StripeWebhookEvent,
    },
};

/// Adapter that wraps StripeClient to implement PaymentGatewayPort.
#[derive(Clone)]
pub struct StripeGateway {
    client: StripeClient,
    webhook_secret: SecretString,
    tolerance_secs: i64,
}

impl StripeGateway {
    pub fn new(secret_key: String, webhook_secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            client: StripeClient::new(secret_key),
            webhook_secret,
            tolerance_secs,
        }
    }
}

#[async_trait]
impl PaymentGatewayPort for StripeGateway {
    #[instrument(skip(self, email))]
    async fn create_customer(
        &self,
        account_id: Uuid,
        email: Option<&str>,
    ) -> AppResult<CustomerId> {
        let customer = self
            .client
            .create_customer(&account_id.to_string(), email)
            .await?;
        Ok(CustomerId::new(customer.id))
    }

    #[instrument(skip(self, request), fields(account_id = %request.account_id, plan = %request.plan))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        let session = self
            .client
            .create_checkout_session(
                request.customer_id.as_str(),
                &request.price_id,
                &request.success_url,
                &request.cancel_url,
                &request.account_id.to_string(),
            )
            .await?;

        let redirect_url = session.url.ok_or_else(|| {
            AppError::ExternalGateway("checkout session returned without a URL".into())
        })?;

        Ok(CheckoutSession {
            session_id: session.id,
            redirect_url,
        })
    }

    fn verify_and_parse_webhook(
        &self,
        raw_body: &str,
        signature_header: &str,
    ) -> AppResult<DomainEvent> {
        parse_webhook_event(
            raw_body,
            signature_header,
            self.webhook_secret.expose_secret(),
            self.tolerance_secs,
        )
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<GatewaySubscription>> {
        let subscription = self.client.find_subscription(subscription_id.as_str()).await?;
        Ok(subscription.map(to_gateway_subscription))
    }

    #[instrument(skip(self))]
    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        cancel_at_period_end: bool,
    ) -> AppResult<GatewaySubscription> {
        let subscription = self
            .client
            .set_cancel_at_period_end(subscription_id.as_str(), cancel_at_period_end)
            .await?;
        Ok(to_gateway_subscription(subscription))
    }
}

/// Verify a Stripe webhook delivery and translate it into a [`DomainEvent`].
///
/// Signature failures are `AppError::Signature`; a verified body that does
/// not match the expected shape is `AppError::Validation`.
pub fn parse_webhook_event(
    raw_body: &str,
    signature_header: &str,
    webhook_secret: &str,
    tolerance_secs: i64,
) -> AppResult<DomainEvent> {
    StripeClient::verify_webhook_signature(
        raw_body,
        signature_header,
        webhook_secret,
        tolerance_secs,
    )?;

    let event: StripeWebhookEvent = serde_json::from_str(raw_body)
        .map_err(|e| AppError::Validation(format!("invalid webhook payload: {e}")))?;

    to_domain_event(event)
}

fn to_domain_event(event: StripeWebhookEvent) -> AppResult<DomainEvent> {
    let domain_event = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = event.object()?;
            DomainEvent::CheckoutCompleted(CheckoutCompleted {
                account_id: session
                    .client_reference_id
                    .as_deref()
                    .and_then(|r| Uuid::parse_str(r).ok()),
                customer_id: session.customer.map(CustomerId::new),
                subscription_id: session.subscription.map(SubscriptionId::new),
                session_id: session.id,
                event_id: event.id,
            })
        }
        "customer.subscription.updated" => {
            let subscription: StripeSubscription = event.object()?;
            DomainEvent::SubscriptionUpdated(SubscriptionChanged {
                event_id: event.id,
                subscription: to_gateway_subscription(subscription),
            })
        }
        "customer.subscription.deleted" => {
            let subscription: StripeSubscription = event.object()?;
            DomainEvent::SubscriptionDeleted(SubscriptionChanged {
                event_id: event.id,
                subscription: to_gateway_subscription(subscription),
            })
        }
        // Stripe sends both for the same invoice; the invoice id dedupes them.
        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice: StripeInvoice = event.object()?;
            DomainEvent::InvoicePaid(to_invoice_event(event.id, invoice))
        }
        "invoice.payment_failed" => {
            let invoice: StripeInvoice = event.object()?;
            DomainEvent::InvoiceFailed(to_invoice_event(event.id, invoice))
        }
        _ => DomainEvent::Unhandled {
            event_type: event.event_type.clone(),
            event_id: event.id,
        },
    };
    Ok(domain_event)
}

fn to_gateway_subscription(subscription: StripeSubscription) -> GatewaySubscription {
    GatewaySubscription {
        current_period_start: subscription.period_start().and_then(timestamp),
        current_period_end: subscription.period_end().and_then(timestamp),
        price_id: subscription.price_id(),
        cancel_at_period_end: subscription.cancel_at_period_end,
        canceled_at: subscription.canceled_at.and_then(timestamp),
        trial_end: subscription.trial_end.and_then(timestamp),
        subscription_id: SubscriptionId::new(subscription.id),
        customer_id: CustomerId::new(subscription.customer),
        status: subscription.status,
    }
}

fn to_invoice_event(event_id: String, invoice: StripeInvoice) -> InvoiceEvent {
    let period = invoice.line_period();
    InvoiceEvent {
        period_start: period.and_then(|p| timestamp(p.start)),
        period_end: period.and_then(|p| timestamp(p.end)),
        subscription_id: invoice.subscription_id().map(SubscriptionId::new),
        customer_id: invoice.customer.map(CustomerId::new),
        billing_reason: invoice.billing_reason,
        invoice_id: invoice.id,
        event_id,
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
