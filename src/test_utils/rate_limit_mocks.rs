use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::app_error::{AppError, AppResult};
use crate::infra::RateLimiterTrait;

/// Admission counter that never expires. Limits apply to IP and account buckets alike.
pub struct InMemoryRateLimiter {
    hits: Mutex<HashMap<(&'static str, String), u64>>,
    limit: u64,
}

impl InMemoryRateLimiter {
    pub fn with_limit(limit: u64) -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            limit,
        }
    }

    pub fn permissive() -> Self {
        Self::with_limit(u64::MAX)
    }

    fn hit(&self, scope: &'static str, id: &str) -> AppResult<()> {
        let mut hits = self.hits.lock().unwrap();
        let count = hits.entry((scope, id.to_owned())).or_default();
        *count += 1;
        if *count > self.limit {
            Err(AppError::RateLimited)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RateLimiterTrait for InMemoryRateLimiter {
    async fn check(&self, ip: &str, account: Option<&str>) -> AppResult<()> {
        self.hit("ip", ip)?;
        account.map_or(Ok(()), |account| self.hit("account", account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn account_bucket_trips_independently_of_ip() {
        let limiter = InMemoryRateLimiter::with_limit(1);

        limiter.check("10.0.0.1", Some("acct")).await.unwrap();
        let err = limiter.check("10.0.0.2", Some("acct")).await.unwrap_err();

        assert!(matches!(err, AppError::RateLimited));
        limiter.check("10.0.0.3", None).await.unwrap();
    }
}
