//! Distributed mutual-exclusion locks.
//!
//! Two flavors: a fire-and-forget lock for deduplicating redelivered events
//! (no owner, simply expires) and a token-owned lock whose holder is proven
//! by a random token, so a caller that outlives its own TTL cannot release
//! a lock that was re-acquired by someone else.
//!
//! Every acquisition path is fail-closed: a store outage degrades to "not
//! acquired", never to a false success.

use std::time::Duration;

use uuid::Uuid;

use crate::store::KeyedStore;

/// Sentinel value written by ownerless locks.
const LOCK_SENTINEL: &str = "1";

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

/// A held token-owned lock.
///
/// The token, not the caller's identity, proves ownership; release and
/// refresh are compare-then-act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedLock {
    key: String,
    token: String,
}

impl OwnedLock {
    /// The store key this lock occupies.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The owner token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Client for distributed locks over a keyed store.
#[derive(Debug, Clone)]
pub struct LockClient<S> {
    store: S,
}

impl<S: KeyedStore> LockClient<S> {
    /// Create a lock client.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Take a fire-and-forget lock: returns whether this call was the
    /// writer. There is no release; the key simply expires.
    ///
    /// A store failure returns `false` — a lock outage must never be
    /// treated as lock success.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        match self
            .store
            .set_if_absent(&lock_key(key), LOCK_SENTINEL, ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "lock store unreachable, treating as not acquired");
                false
            }
        }
    }

    /// Drop a fire-and-forget lock early. Best effort: a store failure is
    /// a no-op, the key expires on its own.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.delete(&lock_key(key)).await {
            tracing::warn!(key = %key, error = %e, "lock store unreachable during release");
        }
    }

    /// Take a token-owned lock. Returns `None` on contention or store
    /// failure.
    pub async fn acquire_owned(&self, key: &str, ttl: Duration) -> Option<OwnedLock> {
        let token = Uuid::new_v4().to_string();
        let key = lock_key(key);
        match self.store.set_if_absent(&key, &token, ttl).await {
            Ok(true) => Some(OwnedLock { key, token }),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "lock store unreachable, treating as not acquired");
                None
            }
        }
    }

    /// Release an owned lock, if it is still ours. A stale or foreign token
    /// is a no-op; so is a store failure (the key will expire on its own).
    pub async fn release_owned(&self, lock: &OwnedLock) {
        match self.store.compare_and_delete(&lock.key, &lock.token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key = %lock.key, "owned lock already expired or re-acquired, not released");
            }
            Err(e) => {
                tracing::warn!(key = %lock.key, error = %e, "lock store unreachable during release");
            }
        }
    }

    /// Extend an owned lock's expiry, if it is still ours. Returns whether
    /// the extension happened.
    pub async fn refresh_owned(&self, lock: &OwnedLock, ttl: Duration) -> bool {
        match self
            .store
            .compare_and_extend(&lock.key, &lock.token, ttl)
            .await
        {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(key = %lock.key, error = %e, "lock store unreachable during refresh");
                false
            }
        }
    }
}

impl<S: KeyedStore + Clone + Send + 'static> LockClient<S> {
    /// Keep an owned lock alive from a background tick until the returned
    /// handle is stopped or dropped.
    ///
    /// Intended for locks held across a process's uptime (e.g. a
    /// startup-coordination lock). The tick stops by itself once a refresh
    /// reports the lock is no longer ours.
    #[must_use]
    pub fn spawn_refresher(&self, lock: OwnedLock, ttl: Duration, period: Duration) -> RefreshHandle {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // first tick completes immediately
            loop {
                tick.tick().await;
                if !client.refresh_owned(&lock, ttl).await {
                    tracing::warn!(key = %lock.key(), "lock refresh lost ownership, stopping refresher");
                    break;
                }
            }
        });
        RefreshHandle { handle }
    }
}

/// Stops the background refresher when dropped.
#[derive(Debug)]
pub struct RefreshHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop refreshing.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MemoryKeyedStore;
    use guildbank_testing::{ManualClock, fixture_time};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn second_acquire_fails_until_expiry() {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let client = LockClient::new(MemoryKeyedStore::with_clock(clock.clone()));

        assert!(client.acquire("event:123", TTL).await);
        assert!(!client.acquire("event:123", TTL).await);

        clock.advance(chrono::Duration::seconds(31));
        assert!(client.acquire("event:123", TTL).await);

        client.release("event:123").await;
        assert!(client.acquire("event:123", TTL).await);
    }

    #[tokio::test]
    async fn owned_lock_is_exclusive_and_releasable() {
        let client = LockClient::new(MemoryKeyedStore::new());

        let lock = client.acquire_owned("game:42", TTL).await.unwrap();
        assert!(client.acquire_owned("game:42", TTL).await.is_none());

        client.release_owned(&lock).await;
        assert!(client.acquire_owned("game:42", TTL).await.is_some());
    }

    #[tokio::test]
    async fn foreign_token_release_is_a_no_op() {
        let client = LockClient::new(MemoryKeyedStore::new());

        let real = client.acquire_owned("game:42", TTL).await.unwrap();
        let forged = OwnedLock {
            key: real.key.clone(),
            token: "someone-else".to_string(),
        };

        client.release_owned(&forged).await;

        // Still held by the real owner.
        assert!(client.acquire_owned("game:42", TTL).await.is_none());
        client.release_owned(&real).await;
        assert!(client.acquire_owned("game:42", TTL).await.is_some());
    }

    #[tokio::test]
    async fn expired_lock_cannot_be_released_onto_a_new_owner() {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let client = LockClient::new(MemoryKeyedStore::with_clock(clock.clone()));

        let stale = client.acquire_owned("game:42", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));

        let fresh = client.acquire_owned("game:42", TTL).await.unwrap();
        client.release_owned(&stale).await;

        // The new owner's lock survived the stale release.
        assert!(client.acquire_owned("game:42", TTL).await.is_none());
        assert!(client.refresh_owned(&fresh, TTL).await);
    }

    #[tokio::test]
    async fn refresh_extends_only_for_the_owner() {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let client = LockClient::new(MemoryKeyedStore::with_clock(clock.clone()));

        let lock = client.acquire_owned("startup", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(20));
        assert!(client.refresh_owned(&lock, TTL).await);

        // 20s + 30s refreshed TTL: still held at +40s from acquisition.
        clock.advance(chrono::Duration::seconds(20));
        assert!(client.acquire_owned("startup", TTL).await.is_none());

        clock.advance(chrono::Duration::seconds(31));
        assert!(!client.refresh_owned(&lock, TTL).await);
    }

    #[tokio::test]
    async fn store_outage_degrades_to_not_acquired() {
        let store = MemoryKeyedStore::new();
        let client = LockClient::new(store.clone());
        store.set_unavailable(true);

        assert!(!client.acquire("event:123", TTL).await);
        assert!(client.acquire_owned("game:42", TTL).await.is_none());

        store.set_unavailable(false);
        let lock = client.acquire_owned("game:42", TTL).await.unwrap();
        store.set_unavailable(true);
        assert!(!client.refresh_owned(&lock, TTL).await);
    }
}
