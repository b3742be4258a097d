use axum::{
    Json, Router,
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::http::{
        app_state::AppState,
        auth::{access_token, current_account},
    },
    app_error::AppResult,
    application::{
        use_cases::subscription::SubscribeOutcome,
        validators::{parse_duration, parse_plan},
    },
    domain::entities::snapshot::SubscriptionSnapshot,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_status))
        .route("/refresh", post(refresh))
        .route("/subscribe", post(subscribe))
        .route("/trial", post(start_trial))
        .route("/cancel", post(cancel))
        .route("/resume", post(resume))
        .route("/usage", get(get_usage).post(record_usage))
        .route("/history", get(history))
        .route("/audit", get(audit))
}

#[derive(Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribePayload {
    plan: String,
    duration: Option<u32>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct TrialPayload {
    plan: String,
}

#[derive(Deserialize)]
struct UsagePayload {
    amount: i64,
    description: Option<String>,
}

/// GET /api/subscription
/// Anonymous callers get the default free snapshot.
async fn get_status(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    if access_token(&headers, &cookies).is_none() {
        return Ok(Json(SubscriptionSnapshot::default_for(Uuid::nil())));
    }
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(
        app_state.subscription_use_cases.get_status(account_id).await,
    ))
}

/// POST /api/subscription/refresh?force=true
async fn refresh(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Query(query): Query<RefreshQuery>,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    let snapshot = app_state
        .subscription_use_cases
        .refresh(account_id, query.force)
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/subscription/subscribe
/// Free plans apply immediately; paid plans answer with a checkout redirect.
async fn subscribe(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Json(payload): Json<SubscribePayload>,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    let plan = parse_plan(&payload.plan)?;
    let duration = parse_duration(payload.duration)?;
    let outcome = app_state
        .subscription_use_cases
        .subscribe(account_id, plan, duration, payload.email.as_deref())
        .await?;

    let body = match outcome {
        SubscribeOutcome::Activated(snapshot) => serde_json::json!({
            "status": "activated",
            "subscription": snapshot,
        }),
        SubscribeOutcome::Checkout(session) => serde_json::json!({
            "status": "checkout",
            "sessionId": session.session_id,
            "redirectUrl": session.redirect_url,
        }),
    };
    Ok(Json(body))
}

/// POST /api/subscription/trial
async fn start_trial(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Json(payload): Json<TrialPayload>,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    let snapshot = app_state
        .subscription_use_cases
        .start_trial(account_id, parse_plan(&payload.plan)?)
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/subscription/cancel
async fn cancel(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(app_state.subscription_use_cases.cancel(account_id).await?))
}

/// POST /api/subscription/resume
async fn resume(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(app_state.subscription_use_cases.resume(account_id).await?))
}

/// GET /api/subscription/usage
async fn get_usage(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(
        app_state.subscription_use_cases.get_usage(account_id).await?,
    ))
}

/// POST /api/subscription/usage
async fn record_usage(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Json(payload): Json<UsagePayload>,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    let usage = app_state
        .subscription_use_cases
        .record_usage(account_id, payload.amount, payload.description.as_deref())
        .await?;
    Ok(Json(usage))
}

/// GET /api/subscription/history
async fn history(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(app_state.subscription_use_cases.history(account_id).await?))
}

/// GET /api/subscription/audit
async fn audit(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> AppResult<impl IntoResponse> {
    let account_id = current_account(&app_state, &headers, &cookies)?;
    Ok(Json(
        app_state.subscription_use_cases.audit_ledger(account_id).await?,
    ))
}
