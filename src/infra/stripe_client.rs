use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;

use crate::app_error::{AppError, AppResult};

const API_BASE: &str = "https://api.stripe.com/v1";

/// Thin REST client over the handful of Stripe endpoints the ledger needs.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    authorization: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{secret_key}:"));
        Self {
            http: Client::new(),
            authorization: format!("Basic {token}"),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{API_BASE}/{path}"))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
    }

    pub async fn create_customer(
        &self,
        account_id: &str,
        email: Option<&str>,
    ) -> AppResult<StripeCustomer> {
        let mut form = vec![("metadata[account_id]", account_id)];
        form.extend(email.map(|email| ("email", email)));

        let response = send(self.request(Method::POST, "customers").form(&form)).await?;
        decode(response).await
    }

    /// Hosted checkout in subscription mode; the account id rides along as
    /// `client_reference_id` and subscription metadata.
    pub async fn create_checkout_session(
        &self,
        customer: &str,
        price: &str,
        success_url: &str,
        cancel_url: &str,
        account_id: &str,
    ) -> AppResult<StripeCheckoutSession> {
        let form = [
            ("mode", "subscription"),
            ("customer", customer),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("client_reference_id", account_id),
            ("subscription_data[metadata][account_id]", account_id),
        ];

        let response = send(self.request(Method::POST, "checkout/sessions").form(&form)).await?;
        decode(response).await
    }

    /// `Ok(None)` when Stripe answers 404.
    pub async fn find_subscription(&self, id: &str) -> AppResult<Option<StripeSubscription>> {
        let response = send(self.request(Method::GET, &format!("subscriptions/{id}"))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    pub async fn set_cancel_at_period_end(
        &self,
        id: &str,
        cancel: bool,
    ) -> AppResult<StripeSubscription> {
        let form = [("cancel_at_period_end", if cancel { "true" } else { "false" })];
        let response =
            send(self.request(Method::POST, &format!("subscriptions/{id}")).form(&form)).await?;
        decode(response).await
    }

    /// Checks a `t=<unix>,v1=<hex hmac>` header against the raw body.
    /// Any matching `v1` entry is accepted, so secrets can be rolled.
    pub fn verify_webhook_signature(
        payload: &str,
        signature_header: &str,
        webhook_secret: &str,
        tolerance_secs: i64,
    ) -> AppResult<()> {
        let header = SignatureHeader::parse(signature_header)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("webhook secret rejected by HMAC".into()))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());

        let matched = header
            .signatures
            .iter()
            .any(|sig| mac.clone().verify_slice(sig).is_ok());
        if !matched {
            return Err(AppError::Signature("signature mismatch".into()));
        }

        let skew = (chrono::Utc::now().timestamp() - header.timestamp).abs();
        if skew > tolerance_secs {
            return Err(AppError::Signature("timestamp outside tolerance".into()));
        }
        Ok(())
    }
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    fn parse(raw: &str) -> AppResult<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for (key, value) in raw.split(',').filter_map(|part| part.trim().split_once('=')) {
            match key {
                "t" => timestamp = Some(value),
                // Entries that are not hex can never match; drop them.
                "v1" => signatures.extend(hex::decode(value).ok()),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::Signature("missing timestamp in signature".into()))?
            .parse()
            .map_err(|_| AppError::Signature("invalid timestamp".into()))?;
        if signatures.is_empty() {
            return Err(AppError::Signature("missing v1 signature".into()));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

async fn send(request: RequestBuilder) -> AppResult<reqwest::Response> {
    request
        .send()
        .await
        .map_err(|e| AppError::ExternalGateway(format!("Stripe unreachable: {e}")))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::ExternalGateway(format!("reading Stripe response: {e}")))?;

    if !status.is_success() {
        tracing::error!(%status, %body, "Stripe rejected request");
        let detail = serde_json::from_str::<StripeErrorResponse>(&body)
            .map(|r| r.error.message.unwrap_or(r.error.error_type))
            .unwrap_or_else(|_| format!("HTTP {status}"));
        return Err(AppError::ExternalGateway(format!("Stripe: {detail}")));
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(%body, error = %e, "Unparseable Stripe response");
        AppError::ExternalGateway(format!("unparseable Stripe response: {e}"))
    })
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    /// Older API versions carry the period on the subscription, newer ones on the item
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub trial_end: Option<i64>,
    pub items: StripeSubscriptionItems,
}

impl StripeSubscription {
    fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn price_id(&self) -> Option<String> {
        self.first_item().map(|item| item.price.id.clone())
    }

    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|i| i.current_period_start))
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|i| i.current_period_end))
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>,
    pub parent: Option<StripeInvoiceParent>,
    pub lines: Option<StripeInvoiceLines>,
}

impl StripeInvoice {
    /// Subscription id from either the legacy field or the invoice parent.
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.clone().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| d.subscription.clone())
        })
    }

    /// Service period of the first line item: the period the payment covers.
    pub fn line_period(&self) -> Option<&StripePeriod> {
        self.lines
            .as_ref()
            .and_then(|l| l.data.first())
            .and_then(|line| line.period.as_ref())
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceParent {
    pub subscription_details: Option<StripeSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionDetails {
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLines {
    pub data: Vec<StripeInvoiceLine>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLine {
    pub period: Option<StripePeriod>,
}

#[derive(Debug, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEventData {
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    /// Deserialize the event's object as `T`.
    pub fn object<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::Validation(format!(
                "unexpected {} payload: {}",
                self.event_type, e
            ))
        })
    }
}
