use axum::{
    Json, Router, extract::State, http::HeaderMap, response::IntoResponse, routing::post,
};

use crate::{
    adapters::http::app_state::AppState, app_error::AppResult,
    application::use_cases::webhook::WebhookOutcome,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/payment", post(payment_webhook))
}

/// POST /webhooks/payment
///
/// The body is taken as raw text; the signature covers the exact bytes the
/// gateway sent. Any 2xx tells the gateway to stop retrying, so only
/// signature failures (400) and retryable errors (5xx) are surfaced.
async fn payment_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = app_state.webhook_use_cases.handle(&body, signature).await?;

    let body = match outcome {
        WebhookOutcome::Processed => serde_json::json!({ "received": true, "outcome": "processed" }),
        WebhookOutcome::Duplicate => serde_json::json!({ "received": true, "outcome": "duplicate" }),
        WebhookOutcome::Ignored(reason) => serde_json::json!({
            "received": true,
            "outcome": "ignored",
            "reason": reason,
        }),
    };
    Ok(Json(body))
}
