//! Counter Store Gateway (C2): atomic increment-with-expiry and block-key set/get/TTL
//! against the shared KV store (Redis).

use async_trait::async_trait;
use deadpool_redis::{redis, Config as RedisConfig, Pool, Runtime};
use std::time::Duration;

use crate::error::AppError;

/// The three primitives the Decision Engine needs from the shared KV store.
/// Abstracted behind a trait so the Decision Engine can be exercised in tests without a
/// live Redis instance.
#[async_trait]
pub trait CounterStoreGateway: Send + Sync {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: i64) -> Result<i64, AppError>;
    async fn set_block(&self, key: &str, ttl_secs: i64) -> Result<(), AppError>;
    async fn ttl(&self, key: &str) -> Result<i64, AppError>;
}

/// `INCR` then, only on first creation, `EXPIRE ttl`. Implemented as a single Lua script
/// so the pair is atomic even if the pool reconnects mid-call.
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

pub struct CounterStore {
    pool: Pool,
    // Per-call deadline; bounds a Redis round-trip that acquired a pooled connection
    // but is slow to respond, distinct from pool checkout itself.
    call_timeout: Duration,
}

impl CounterStore {
    pub fn connect(redis_url: &str, call_timeout: Duration) -> anyhow::Result<Self> {
        let cfg = RedisConfig::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool, call_timeout })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, AppError> {
        match tokio::time::timeout(self.call_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to acquire redis connection");
                Err(AppError::KvUnavailable)
            }
            Err(_) => {
                tracing::error!("redis connection acquisition timed out");
                Err(AppError::KvUnavailable)
            }
        }
    }
}

#[async_trait]
impl CounterStoreGateway for CounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: i64) -> Result<i64, AppError> {
        let mut conn = self.conn().await?;
        let call = redis::Script::new(INCR_WITH_EXPIRY_SCRIPT)
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn);

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "counter increment failed");
                Err(AppError::KvUnavailable)
            }
            Err(_) => {
                tracing::error!("counter increment timed out");
                Err(AppError::KvUnavailable)
            }
        }
    }

    async fn set_block(&self, key: &str, ttl_secs: i64) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let call = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(1)
            .query_async::<_, ()>(&mut conn);

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "set_block failed");
                Err(AppError::KvUnavailable)
            }
            Err(_) => {
                tracing::error!("set_block timed out");
                Err(AppError::KvUnavailable)
            }
        }
    }

    /// Remaining seconds, or a negative sentinel (Redis convention) if the key doesn't exist.
    async fn ttl(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.conn().await?;
        let call = redis::cmd("TTL").arg(key).query_async(&mut conn);

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(ttl)) => Ok(ttl),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "ttl check failed");
                Err(AppError::KvUnavailable)
            }
            Err(_) => {
                tracing::error!("ttl check timed out");
                Err(AppError::KvUnavailable)
            }
        }
    }
}

/// Counter/block key layout.
pub fn counter_key(username: &str, endpoint: &str, window_id: i64) -> String {
    format!("rl:{username}:{endpoint}:{window_id}")
}

pub fn block_key(username: &str, endpoint: &str) -> String {
    format!("rl:block:{username}:{endpoint}")
}


/// An in-process stand-in for Redis, used by the Decision Engine's tests.
#[cfg(test)]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeCounterStore {
        counters: Mutex<HashMap<String, i64>>,
        blocks: Mutex<HashMap<String, i64>>,
    }

    impl FakeCounterStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CounterStoreGateway for FakeCounterStore {
        async fn incr_with_expiry(&self, key: &str, _ttl_secs: i64) -> Result<i64, AppError> {
            let mut counters = self.counters.lock();
            let count = counters.entry(key.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn set_block(&self, key: &str, ttl_secs: i64) -> Result<(), AppError> {
            self.blocks.lock().insert(key.to_string(), ttl_secs);
            Ok(())
        }

        async fn ttl(&self, key: &str) -> Result<i64, AppError> {
            Ok(*self.blocks.lock().get(key).unwrap_or(&-1))
        }
    }
}
