use std::sync::Arc;

use crate::{
    application::{
        snapshot_cache::SnapshotCaches,
        use_cases::{subscription::SubscriptionUseCases, webhook::WebhookUseCases},
    },
    infra::{RateLimiterTrait, config::AppConfig},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub subscription_use_cases: Arc<SubscriptionUseCases>,
    pub webhook_use_cases: Arc<WebhookUseCases>,
    /// Shared with the sweep loop spawned in `main`
    pub caches: Arc<SnapshotCaches>,
    pub rate_limiter: Arc<dyn RateLimiterTrait>,
}
