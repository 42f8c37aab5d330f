//! External KV seam
//!
//! All admission-layer coordination (rate-limit windows, idempotency
//! reservations) goes through single-key atomic primitives on this trait.
//! The Redis implementation is production; the in-memory one backs tests and
//! can simulate an outage to exercise fail-open/fail-closed behavior.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tripsage_core::{Error, Result};

/// Outcome of one sliding-window probe.
#[derive(Debug, Clone, Copy)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Entries in the window after this probe
    pub count: u32,
    /// Timestamp (ms) of the oldest entry, for Retry-After/reset math
    pub oldest_ms: Option<u64>,
}

/// Single-key atomic KV operations.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// `SET key value NX PX ttl`; true when the reservation is fresh.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Sliding-window log probe: drop entries older than `window`, then admit
    /// and record the request iff the window holds fewer than `limit`.
    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_ms: u64,
    ) -> Result<WindowDecision>;

    /// Liveness probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

/// Shared KV handle.
pub type KvHandle = Arc<dyn KvClient>;

// Executed atomically server-side; the whole window decision is one script.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local cutoff = tonumber(ARGV[1]) - tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, cutoff)
local count = redis.call('ZCARD', KEYS[1])
local allowed = 0
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], tonumber(ARGV[1]), ARGV[4])
    redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
    allowed = 1
    count = count + 1
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_ms = 0
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
"#;

/// Redis-backed KV client.
pub struct RedisKv {
    connection: Mutex<MultiplexedConnection>,
    script: redis::Script,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::internal(format!("invalid KV url: {e}")))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::internal(format!("KV connect failed: {e}")))?;
        Ok(Self {
            connection: Mutex::new(connection),
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        // MultiplexedConnection is a cheap clone over one shared pipe.
        self.connection.lock().clone()
    }
}

#[async_trait]
impl KvClient for RedisKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::internal(format!("KV SET failed: {e}")))?;
        Ok(reply.is_some())
    }

    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_ms: u64,
    ) -> Result<WindowDecision> {
        let mut conn = self.conn();
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
        let (allowed, count, oldest_ms): (u8, u32, u64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window.as_millis() as u64)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::internal(format!("KV window script failed: {e}")))?;
        Ok(WindowDecision {
            allowed: allowed == 1,
            count,
            oldest_ms: (oldest_ms > 0).then_some(oldest_ms),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::internal(format!("KV ping failed: {e}")))
    }
}

/// Deterministic in-process KV for tests and local development.
#[derive(Default)]
pub struct InMemoryKv {
    reservations: Mutex<HashMap<String, (String, std::time::Instant, Duration)>>,
    windows: Mutex<HashMap<String, Vec<u64>>>,
    /// When set, every operation fails as if the store were unreachable.
    unavailable: AtomicBool,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a KV outage (drives fail-open/fail-closed tests).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::internal("KV unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let mut reservations = self.reservations.lock();
        let now = std::time::Instant::now();
        if let Some((_, reserved_at, reserved_ttl)) = reservations.get(key) {
            if now.duration_since(*reserved_at) < *reserved_ttl {
                return Ok(false);
            }
        }
        reservations.insert(key.to_string(), (value.to_string(), now, ttl));
        Ok(true)
    }

    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_ms: u64,
    ) -> Result<WindowDecision> {
        self.check_available()?;
        let mut windows = self.windows.lock();
        let entries = windows.entry(key.to_string()).or_default();
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        entries.retain(|ts| *ts > cutoff);
        let allowed = (entries.len() as u32) < limit;
        if allowed {
            entries.push(now_ms);
        }
        Ok(WindowDecision {
            allowed,
            count: entries.len() as u32,
            oldest_ms: entries.first().copied(),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_reserves_once() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx("evt:1", "owner", Duration::from_secs(300)).await.unwrap());
        assert!(!kv.set_nx("evt:1", "owner", Duration::from_secs(300)).await.unwrap());
        assert!(kv.set_nx("evt:2", "owner", Duration::from_secs(300)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_expires() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx("evt:1", "o", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv.set_nx("evt:1", "o", Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sliding_window_denies_over_limit() {
        let kv = InMemoryKv::new();
        let window = Duration::from_secs(60);
        for i in 0..3 {
            let decision = kv.sliding_window("rl", window, 3, 1_000 + i).await.unwrap();
            assert!(decision.allowed, "request {i} should be admitted");
        }
        let denied = kv.sliding_window("rl", window, 3, 1_004).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
    }

    #[tokio::test]
    async fn test_sliding_window_rolls_over() {
        let kv = InMemoryKv::new();
        let window = Duration::from_millis(100);
        assert!(kv.sliding_window("rl", window, 1, 1_000).await.unwrap().allowed);
        assert!(!kv.sliding_window("rl", window, 1, 1_050).await.unwrap().allowed);
        // Past the window the oldest entry falls out.
        assert!(kv.sliding_window("rl", window, 1, 1_200).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_unavailable_mode() {
        let kv = InMemoryKv::new();
        kv.set_unavailable(true);
        assert!(kv.ping().await.is_err());
        assert!(kv.set_nx("k", "v", Duration::from_secs(1)).await.is_err());
        kv.set_unavailable(false);
        assert!(kv.ping().await.is_ok());
    }
}
