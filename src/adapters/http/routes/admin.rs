use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, auth::require_admin},
    app_error::AppResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts/{account_id}/status", get(account_status))
        .route("/accounts/{account_id}/audit", get(account_audit))
        .route("/accounts/{account_id}/credits", post(adjust_credits))
}

#[derive(Deserialize)]
struct AdjustCreditsPayload {
    delta: i64,
    reason: String,
}

/// GET /api/admin/accounts/{account_id}/status
/// Bypasses the snapshot cache.
async fn account_status(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Path(account_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    require_admin(&app_state, &headers, &cookies)?;
    let snapshot = app_state
        .subscription_use_cases
        .refresh(account_id, false)
        .await?;
    Ok(Json(snapshot))
}

/// GET /api/admin/accounts/{account_id}/audit
async fn account_audit(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Path(account_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    require_admin(&app_state, &headers, &cookies)?;
    Ok(Json(
        app_state.subscription_use_cases.audit_ledger(account_id).await?,
    ))
}

/// POST /api/admin/accounts/{account_id}/credits
async fn adjust_credits(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<AdjustCreditsPayload>,
) -> AppResult<impl IntoResponse> {
    let claims = require_admin(&app_state, &headers, &cookies)?;
    tracing::info!(
        operator = %claims.sub,
        %account_id,
        delta = payload.delta,
        "Operator credit adjustment"
    );
    let usage = app_state
        .subscription_use_cases
        .adjust_credits(account_id, payload.delta, &payload.reason)
        .await?;
    Ok(Json(usage))
}
