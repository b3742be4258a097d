use std::fs::File;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{http::app_state::AppState, persistence::PostgresPersistence},
    application::{
        ports::payment_gateway::PaymentGatewayPort,
        snapshot_cache::SnapshotCaches,
        use_cases::{
            ledger::LedgerRepo, reconciler::Reconciler, subscription::SubscriptionUseCases,
            webhook::WebhookUseCases,
        },
    },
    infra::{
        RateLimiterTrait, config::AppConfig, db::init_db, rate_limit::RedisRateLimiter,
        stripe_gateway::StripeGateway,
    },
};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;

    let pool = init_db(&config.database_url).await?;
    let ledger: Arc<dyn LedgerRepo> = Arc::new(PostgresPersistence::new(pool));

    let rate_limiter: Arc<dyn RateLimiterTrait> = Arc::new(
        RedisRateLimiter::new(
            &config.redis_url,
            config.rate_limit_window_secs,
            config.rate_limit_per_ip,
            config.rate_limit_per_account,
        )
        .await?,
    );

    let gateway: Arc<dyn PaymentGatewayPort> = Arc::new(StripeGateway::new(
        config.stripe_secret_key.expose_secret().to_string(),
        config.stripe_webhook_secret.clone(),
        config.stripe_webhook_tolerance_secs,
    ));

    let catalog = Arc::new(config.plan_catalog.clone());
    let caches = Arc::new(SnapshotCaches::new(
        config.snapshot_cache_ttl,
        config.usage_cache_ttl,
    ));

    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        gateway.clone(),
        catalog.clone(),
        caches.clone(),
    ));

    let subscription_use_cases = SubscriptionUseCases::new(
        reconciler.clone(),
        ledger,
        gateway.clone(),
        catalog,
        caches.clone(),
        config.app_origin.as_str().trim_end_matches('/').to_string(),
    );

    let webhook_use_cases = WebhookUseCases::new(gateway, reconciler);

    Ok(AppState {
        config: Arc::new(config),
        subscription_use_cases: Arc::new(subscription_use_cases),
        webhook_use_cases: Arc::new(webhook_use_cases),
        caches,
        rate_limiter,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "credit_ledger=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer().with_target(false).with_level(true).pretty();

    // File (structured JSON logs); console only if the file can't be created
    let json_layer = File::create("app.log").ok().map(|file| {
        fmt::layer()
            .json()
            .with_writer(file)
            .with_current_span(true)
            .with_span_list(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
