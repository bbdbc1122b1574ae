//! In-memory keyed store for testing.
//!
//! Implements the same atomic-conditional-write semantics as the Redis
//! store, with an injectable clock so expiry can be crossed without
//! sleeping, and an "unavailable" switch to exercise the fail-closed
//! degradation paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use guildbank_core::environment::{Clock, SystemClock};

use crate::error::{CoordinationError, Result};
use crate::store::{KeyedStore, ReserveOutcome};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Mock keyed store backed by a `HashMap`.
#[derive(Clone)]
pub struct MemoryKeyedStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryKeyedStore {
    /// Create a mock store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a mock store on an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent operation fail as if the store were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of live (unexpired) keys, for assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn live_len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::StoreUnavailable {
                detail: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Current value of `key` if present and unexpired; expired entries are
    /// dropped eagerly, mirroring lazy expiry.
    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| CoordinationError::StoreUnavailable {
                detail: "mutex poisoned".to_string(),
            })
    }
}

impl Default for MemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl KeyedStore for MemoryKeyedStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        Ok(Self::live_value(&mut entries, key, now))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let mut entries = self.lock_entries()?;
        entries.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        if Self::live_value(&mut entries, key, now).as_deref() == Some(expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        if Self::live_value(&mut entries, key, now).as_deref() == Some(expected) {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = expiry(now, ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reserve(&self, key: &str, value: &str, ttl: Duration) -> Result<ReserveOutcome> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.lock_entries()?;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                let remaining = (entry.expires_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                return Ok(ReserveOutcome::Held { remaining });
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(ReserveOutcome::Reserved)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.check_available()?;
        let now = self.clock.now();
        let entries = self.lock_entries()?;
        Ok(entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                (entry.expires_at - now).to_std().ok()
            } else {
                None
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use guildbank_testing::{ManualClock, fixture_time};

    #[tokio::test]
    async fn conditional_write_respects_expiry() {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let store = MemoryKeyedStore::with_clock(clock.clone());

        assert!(store.set_if_absent("k", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());

        clock.advance(chrono::Duration::seconds(11));
        assert!(store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn unavailable_switch_fails_everything() {
        let store = MemoryKeyedStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("k").await,
            Err(CoordinationError::StoreUnavailable { .. })
        ));
    }
}
