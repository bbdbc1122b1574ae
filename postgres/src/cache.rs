//! Read-through account cache with TTL eviction.
//!
//! Owned by the [`crate::LedgerService`] instance rather than living in
//! process-global state. The eviction loop starts at construction and is
//! stopped by [`AccountCache::shutdown`] or on drop.
//!
//! The cache only short-circuits reads of loan-free accounts: normalizing
//! an account without a loan is the identity, so a cached copy cannot hide
//! a due-date transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use guildbank_core::account::{Account, AccountId};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    account: Account,
    cached_at: Instant,
}

/// TTL-bound read cache over account rows.
#[derive(Debug)]
pub struct AccountCache {
    entries: Arc<RwLock<HashMap<AccountId, CacheEntry>>>,
    ttl: Duration,
    sweeper: tokio::task::JoinHandle<()>,
}

impl AccountCache {
    /// Create a cache and start its eviction loop.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let entries: Arc<RwLock<HashMap<AccountId, CacheEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let sweep_entries = Arc::clone(&entries);
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let now = Instant::now();
                let mut map = sweep_entries.write().await;
                let before = map.len();
                map.retain(|_, entry| now.duration_since(entry.cached_at) < ttl);
                let evicted = before - map.len();
                if evicted > 0 {
                    tracing::debug!(evicted = evicted, live = map.len(), "account cache sweep");
                }
            }
        });
        Self {
            entries,
            ttl,
            sweeper,
        }
    }

    /// Fetch a live (unexpired) entry.
    pub async fn get(&self, id: &AccountId) -> Option<Account> {
        let map = self.entries.read().await;
        map.get(id).and_then(|entry| {
            if entry.cached_at.elapsed() < self.ttl {
                Some(entry.account.clone())
            } else {
                None
            }
        })
    }

    /// Insert or refresh an entry.
    pub async fn insert(&self, account: &Account) {
        let mut map = self.entries.write().await;
        map.insert(
            account.id.clone(),
            CacheEntry {
                account: account.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop an entry.
    pub async fn invalidate(&self, id: &AccountId) {
        self.entries.write().await.remove(id);
    }

    /// Stop the eviction loop.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }
}

impl Drop for AccountCache {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn account(user: &str) -> Account {
        Account::new(AccountId::new(user, "c1"), 100)
    }

    #[tokio::test]
    async fn serves_fresh_entries_and_expires_old_ones() {
        let cache = AccountCache::new(Duration::from_millis(40), Duration::from_secs(60));
        let account = account("u1");

        cache.insert(&account).await;
        assert_eq!(cache.get(&account.id).await, Some(account.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(&account.id).await, None);
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let cache = AccountCache::new(Duration::from_millis(20), Duration::from_millis(30));
        cache.insert(&account("u1")).await;
        cache.insert(&account("u2")).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let map = cache.entries.read().await;
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn invalidate_drops_an_entry() {
        let cache = AccountCache::new(Duration::from_secs(30), Duration::from_secs(60));
        let account = account("u1");
        cache.insert(&account).await;
        cache.invalidate(&account.id).await;
        assert_eq!(cache.get(&account.id).await, None);
    }
}
