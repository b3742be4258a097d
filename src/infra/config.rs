use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

use super::InfraError;
use crate::{
    application::plan_catalog::{
        DEFAULT_FREE_CREDITS, DEFAULT_FREE_PERIOD_DAYS, DEFAULT_TRIAL_DAYS, PlanCatalog,
    },
    domain::entities::plan::{BillingDuration, PlanCode},
};

pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_per_ip: u64,
    pub rate_limit_per_account: u64,
    /// Whether to trust X-Forwarded-For headers. Set to true when behind a reverse proxy (Caddy, nginx).
    /// SECURITY: Only enable this when the API is not directly exposed to the internet.
    pub trust_proxy: bool,
    /// Shared with the service that mints account tokens.
    pub jwt_secret: SecretString,
    /// Base for checkout success and cancel URLs.
    pub app_origin: Url,
    pub cors_origin: HeaderValue,
    pub stripe_secret_key: SecretString,
    pub stripe_webhook_secret: SecretString,
    pub stripe_webhook_tolerance_secs: i64,
    pub plan_catalog: PlanCatalog,
    pub snapshot_cache_ttl: Duration,
    pub usage_cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let bind_addr: SocketAddr = get_env_default(
            "BIND_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 3001)),
        );
        let database_url: String = get_env("DATABASE_URL");
        let redis_url: String = get_env_default("REDIS_URL", "redis://127.0.0.1:6379".to_string());
        let rate_limit_window_secs: u64 = get_env_default("RATE_LIMIT_WINDOW_SECS", 60);
        let rate_limit_per_ip: u64 = get_env_default("RATE_LIMIT_PER_IP", 120);
        let rate_limit_per_account: u64 = get_env_default("RATE_LIMIT_PER_ACCOUNT", 60);
        // Default to false for security - must explicitly enable when behind a trusted proxy
        let trust_proxy: bool = get_env_default("TRUST_PROXY", false);

        let jwt_secret = SecretString::from(get_env::<String>("JWT_SECRET"));
        let app_origin: Url = get_env("APP_ORIGIN");
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .map_err(|_| InfraError::ConfigInvalid {
                    var: "CORS_ORIGIN",
                    reason: "not a valid header value".into(),
                })?;

        let stripe_secret_key = SecretString::from(get_env::<String>("STRIPE_SECRET_KEY"));
        let stripe_webhook_secret = SecretString::from(get_env::<String>("STRIPE_WEBHOOK_SECRET"));
        let stripe_webhook_tolerance_secs: i64 =
            get_env_default("STRIPE_WEBHOOK_TOLERANCE_SECS", 300);

        let snapshot_cache_ttl_secs: u64 = get_env_default("SNAPSHOT_CACHE_TTL_SECS", 300);
        let usage_cache_ttl_secs: u64 = get_env_default("USAGE_CACHE_TTL_SECS", 30);
        let cache_sweep_interval_secs: u64 = get_env_default("CACHE_SWEEP_INTERVAL_SECS", 60);

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            rate_limit_window_secs,
            rate_limit_per_ip,
            rate_limit_per_account,
            trust_proxy,
            jwt_secret,
            app_origin,
            cors_origin,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_webhook_tolerance_secs,
            plan_catalog: plan_catalog_from_env()?,
            snapshot_cache_ttl: Duration::from_secs(snapshot_cache_ttl_secs),
            usage_cache_ttl: Duration::from_secs(usage_cache_ttl_secs),
            cache_sweep_interval: Duration::from_secs(cache_sweep_interval_secs.max(1)),
        })
    }
}

fn plan_catalog_from_env() -> Result<PlanCatalog, InfraError> {
    let free_credits: i64 = get_env_default("FREE_PLAN_CREDITS", DEFAULT_FREE_CREDITS);
    let free_period_days: i64 = get_env_default("FREE_PLAN_PERIOD_DAYS", DEFAULT_FREE_PERIOD_DAYS);
    let trial_days: i64 = get_env_default("TRIAL_DAYS", DEFAULT_TRIAL_DAYS);
    if free_credits < 0 || free_period_days <= 0 || trial_days <= 0 {
        return Err(InfraError::ConfigInvalid {
            var: "FREE_PLAN_CREDITS/FREE_PLAN_PERIOD_DAYS/TRIAL_DAYS",
            reason: "credits must be >= 0 and periods > 0".into(),
        });
    }

    let defaults = PlanCatalog::default();
    let mut catalog = PlanCatalog::new(free_credits, free_period_days, trial_days);

    for &plan in PlanCode::paid() {
        let var = credits_env_var(plan);
        let credits: i64 = get_env_default(var, defaults.monthly_credits(plan));
        if credits <= 0 {
            return Err(InfraError::ConfigInvalid {
                var,
                reason: "monthly credits must be positive".into(),
            });
        }
        catalog = catalog.with_monthly_credits(plan, credits);

        for &duration in BillingDuration::all() {
            if let Ok(price_id) = std::env::var(price_env_var(plan, duration))
                && !price_id.trim().is_empty()
            {
                catalog = catalog.with_price(plan, duration, price_id.trim());
            }
        }
    }

    Ok(catalog)
}

fn credits_env_var(plan: PlanCode) -> &'static str {
    match plan {
        PlanCode::Free => "FREE_PLAN_CREDITS",
        PlanCode::Basic => "CREDITS_BASIC",
        PlanCode::Pro => "CREDITS_PRO",
        PlanCode::Premium => "CREDITS_PREMIUM",
    }
}

/// `STRIPE_PRICE_PRO_3M` and friends.
fn price_env_var(plan: PlanCode, duration: BillingDuration) -> String {
    format!("STRIPE_PRICE_{}_{}M", plan, duration.months())
}
