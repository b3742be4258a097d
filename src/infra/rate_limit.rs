use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use super::InfraError;
use crate::app_error::{AppError, AppResult};

/// Admission control for the `/api` surface.
#[async_trait]
pub trait RateLimiterTrait: Send + Sync {
    /// Counts one request against the caller's IP bucket and, when the caller
    /// is authenticated, against its account bucket as well.
    async fn check(&self, ip: &str, account: Option<&str>) -> AppResult<()>;
}

// KEYS[1] = bucket key, ARGV[1] = window in seconds.
// A key that somehow lost its TTL gets it back on the next hit.
const FIXED_WINDOW_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
if hits == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return hits
"#;

const KEY_PREFIX: &str = "credit-ledger:rl";

#[derive(Clone, Copy, Debug)]
enum Bucket {
    Ip,
    Account,
}

impl Bucket {
    fn key(self, id: &str) -> String {
        match self {
            Bucket::Ip => format!("{KEY_PREFIX}:ip:{id}"),
            Bucket::Account => format!("{KEY_PREFIX}:account:{id}"),
        }
    }
}

/// Fixed-window limiter backed by a shared Redis instance, so limits hold
/// across every replica of the service.
#[derive(Clone)]
pub struct RedisRateLimiter {
    manager: ConnectionManager,
    script: Script,
    window_secs: u64,
    ip_limit: u64,
    account_limit: u64,
}

impl RedisRateLimiter {
    pub async fn new(
        redis_url: &str,
        window_secs: u64,
        ip_limit: u64,
        account_limit: u64,
    ) -> Result<Self, InfraError> {
        let manager = redis::Client::open(redis_url)
            .map_err(InfraError::RedisConnection)
            .map(ConnectionManager::new)?
            .await
            .map_err(InfraError::RedisConnection)?;

        Ok(Self {
            manager,
            script: Script::new(FIXED_WINDOW_SCRIPT),
            window_secs,
            ip_limit,
            account_limit,
        })
    }

    fn limit_for(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::Ip => self.ip_limit,
            Bucket::Account => self.account_limit,
        }
    }

    async fn hit(&self, conn: &mut ConnectionManager, bucket: Bucket, id: &str) -> AppResult<()> {
        let hits: u64 = self
            .script
            .key(bucket.key(id))
            .arg(self.window_secs)
            .invoke_async(conn)
            .await
            .map_err(|e| AppError::Internal(format!("rate limiter unavailable: {e}")))?;

        let limit = self.limit_for(bucket);
        if hits > limit {
            tracing::warn!(?bucket, id, hits, limit, "Rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiterTrait for RedisRateLimiter {
    async fn check(&self, ip: &str, account: Option<&str>) -> AppResult<()> {
        let mut conn = self.manager.clone();
        self.hit(&mut conn, Bucket::Ip, ip).await?;
        if let Some(account) = account {
            self.hit(&mut conn, Bucket::Account, account).await?;
        }
        Ok(())
    }
}
