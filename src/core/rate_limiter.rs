//! Fixed-window rate limiting backed by a shared counter store
//!
//! Each (identity, action) pair gets a counter that is created with an
//! expiry equal to the window on its first increment. Bursts straddling a
//! window boundary can admit up to twice the limit; that is accepted.
//! Any counter store failure denies the action.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitPolicy;
use crate::error::Result;

/// Shared counter storage
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment a counter and return its new value
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set the counter to expire after `window`
    async fn expire(&self, key: &str, window: Duration) -> Result<()>;
}

/// Counters kept in Redis with INCR / EXPIRE
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        Ok(Self {
            conn: ConnectionManager::new(client.clone()).await?,
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, window: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = window.as_secs().max(1) as i64;
        let _: bool = conn.expire(key, seconds).await?;
        Ok(())
    }
}

/// Counters kept in process memory, for single-instance runs and tests
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (i64, Option<Instant>)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired counters
    pub async fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        counters.retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        if entry.1.is_some_and(|at| at <= now) {
            *entry = (0, None);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn expire(&self, key: &str, window: Duration) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(entry) = counters.get_mut(key) {
            entry.1 = Some(Instant::now() + window);
        }
        Ok(())
    }
}

/// Fixed-window limiter keyed by (identity, action)
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    fn key(identity: i64, action: &str) -> String {
        format!("rate:{}:{}", action, identity)
    }

    /// Count one action and report whether it is within the quota
    pub async fn check(&self, identity: i64, action: &str, policy: RateLimitPolicy) -> bool {
        let key = Self::key(identity, action);
        match self.count(&key, policy.window).await {
            Ok(count) => {
                let allowed = count <= policy.limit as i64;
                if !allowed {
                    log::warn!(
                        "Rate limit exceeded for user {} on {} ({}/{})",
                        identity, action, count, policy.limit
                    );
                }
                allowed
            }
            Err(e) => {
                log::error!("Rate limiter store failure for {}, denying: {}", key, e);
                false
            }
        }
    }

    async fn count(&self, key: &str, window: Duration) -> Result<i64> {
        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, window).await?;
        }
        Ok(count)
    }
}
