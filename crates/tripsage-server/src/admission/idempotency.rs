//! Idempotency reservations
//!
//! One primitive: reserve an opaque key with a TTL, exactly once. A failed
//! reservation means the event was already seen and the side effect must not
//! re-execute.

use crate::kv::KvHandle;
use std::time::Duration;
use tripsage_core::Result;

/// Default reservation lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Reservation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// First sighting; proceed with the side effect
    Fresh,
    /// Key already reserved; treat as duplicate
    Duplicate,
}

impl Reservation {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Reservation::Duplicate)
    }
}

/// Reserve-once-with-TTL over the KV.
pub struct IdempotencyStore {
    kv: KvHandle,
    ttl: Duration,
    /// Diagnostic owner tag written as the reservation value
    owner: String,
}

impl IdempotencyStore {
    pub fn new(kv: KvHandle, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            owner: format!("tripsage:{}", uuid::Uuid::new_v4()),
        }
    }

    /// Reserve `key`; `Duplicate` when someone (including us) already holds it.
    pub async fn reserve(&self, key: &str) -> Result<Reservation> {
        let namespaced = format!("idem:{key}");
        let fresh = self.kv.set_nx(&namespaced, &self.owner, self.ttl).await?;
        Ok(if fresh {
            Reservation::Fresh
        } else {
            Reservation::Duplicate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_once() {
        let store = IdempotencyStore::new(Arc::new(InMemoryKv::new()), DEFAULT_TTL);
        assert_eq!(store.reserve("evt-1").await.unwrap(), Reservation::Fresh);
        assert_eq!(store.reserve("evt-1").await.unwrap(), Reservation::Duplicate);
        assert_eq!(store.reserve("evt-2").await.unwrap(), Reservation::Fresh);
    }

    #[tokio::test]
    async fn test_reservation_expires() {
        let store = IdempotencyStore::new(Arc::new(InMemoryKv::new()), Duration::from_millis(10));
        assert_eq!(store.reserve("evt-1").await.unwrap(), Reservation::Fresh);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.reserve("evt-1").await.unwrap(), Reservation::Fresh);
    }

    #[tokio::test]
    async fn test_kv_failure_propagates() {
        let kv = Arc::new(InMemoryKv::new());
        kv.set_unavailable(true);
        let store = IdempotencyStore::new(kv, DEFAULT_TTL);
        assert!(store.reserve("evt-1").await.is_err());
    }
}
