//! Access-token extraction for routes and middleware.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::jwt::{self, Claims},
};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Raw token from the `access_token` cookie, else from `Authorization: Bearer`.
pub fn access_token(headers: &HeaderMap, cookies: &CookieJar) -> Option<String> {
    if let Some(cookie) = cookies.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_owned());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

pub fn current_claims(
    app_state: &AppState,
    headers: &HeaderMap,
    cookies: &CookieJar,
) -> AppResult<Claims> {
    let token = access_token(headers, cookies).ok_or(AppError::InvalidCredentials)?;
    jwt::verify(&token, &app_state.config.jwt_secret)
}

/// Account id of the caller.
pub fn current_account(
    app_state: &AppState,
    headers: &HeaderMap,
    cookies: &CookieJar,
) -> AppResult<Uuid> {
    current_claims(app_state, headers, cookies)?.account_id()
}

/// Claims of an operator token; 403 for valid tokens without the admin flag.
pub fn require_admin(
    app_state: &AppState,
    headers: &HeaderMap,
    cookies: &CookieJar,
) -> AppResult<Claims> {
    let claims = current_claims(app_state, headers, cookies)?;
    if !claims.admin {
        tracing::warn!(security_event = true, sub = %claims.sub, "Non-admin token on operator route");
        return Err(AppError::Forbidden);
    }
    Ok(claims)
}
