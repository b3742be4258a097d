pub mod admin;
pub mod subscription;
pub mod webhooks;

use axum::Router;

use crate::adapters::http::app_state::AppState;

/// Routes mounted under `/api`. Webhooks are mounted separately in `create_app`.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/subscription", subscription::router())
        .nest("/admin", admin::router())
}
