use axum::{
    Router,
    http::{HeaderValue, Method, Request, header},
    middleware,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::Span;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, middleware::rate_limit_middleware, routes},
    infra::setup::init_tracing,
};

/// Assembles the full router: `/api` for clients, `/webhooks` for the payment gateway.
pub fn create_app(app_state: AppState) -> Router {
    init_tracing();

    let client_api = Router::new()
        .nest("/api", routes::router())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors(&app_state));

    // Gateway callbacks carry no browser origin and are retried upstream.
    let gateway_callbacks = Router::new().nest("/webhooks", routes::webhooks::router());

    Router::new()
        .merge(client_api)
        .merge(gateway_callbacks)
        .with_state(app_state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

fn cors(app_state: &AppState) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(app_state.config.cors_origin.clone())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn request_span<B>(request: &Request<B>) -> Span {
    tracing::info_span!(
        "ledger-http",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
        request_id = %Uuid::new_v4()
    )
}
