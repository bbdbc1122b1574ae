//! Per-command cooldown reservations.
//!
//! A reservation is written create-if-absent, so two racing invocations of
//! the same command cannot both pass the cooldown check; on contention the
//! holder's remaining time comes back in the same round trip, avoiding a
//! read-then-write race.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use guildbank_core::environment::{Clock, SystemClock};

use crate::error::{CoordinationError, Result};
use crate::store::{KeyedStore, ReserveOutcome};

fn cooldown_key(user_id: &str, community_id: &str, command: &str) -> String {
    format!("cooldown:{community_id}:{user_id}:{command}")
}

/// What happened to a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// The cooldown was free and is now reserved.
    Reserved,
    /// Someone already holds it; it expires in `remaining`.
    Held {
        /// Time until the existing reservation expires.
        remaining: Duration,
    },
}

/// Client for cooldown reservations over a keyed store.
#[derive(Clone)]
pub struct CooldownClient<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: KeyedStore> CooldownClient<S> {
    /// Create a cooldown client on the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a cooldown client on an injected clock.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Reserve the cooldown for `command` until `expires_at`.
    ///
    /// An `expires_at` at or before now reserves trivially (there is
    /// nothing to hold).
    ///
    /// # Errors
    ///
    /// [`CoordinationError::LockUnavailable`] if the store cannot be
    /// reached; the caller must treat the command as not safe to run.
    pub async fn reserve(
        &self,
        user_id: &str,
        community_id: &str,
        command: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CooldownDecision> {
        let now = self.clock.now();
        let Ok(ttl) = (expires_at - now).to_std() else {
            return Ok(CooldownDecision::Reserved);
        };
        if ttl.is_zero() {
            return Ok(CooldownDecision::Reserved);
        }

        let key = cooldown_key(user_id, community_id, command);
        match self
            .store
            .reserve(&key, "1", ttl)
            .await
            .map_err(lock_unavailable)?
        {
            ReserveOutcome::Reserved => Ok(CooldownDecision::Reserved),
            ReserveOutcome::Held { remaining } => Ok(CooldownDecision::Held { remaining }),
        }
    }

    /// Remaining time on an existing reservation, if any.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::LockUnavailable`] if the store cannot be
    /// reached.
    pub async fn remaining(
        &self,
        user_id: &str,
        community_id: &str,
        command: &str,
    ) -> Result<Option<Duration>> {
        self.store
            .ttl_remaining(&cooldown_key(user_id, community_id, command))
            .await
            .map_err(lock_unavailable)
    }

    /// Release a reservation early, e.g. when the command aborted before
    /// doing anything cooldown-worthy.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::LockUnavailable`] if the store cannot be
    /// reached.
    pub async fn clear(&self, user_id: &str, community_id: &str, command: &str) -> Result<()> {
        self.store
            .delete(&cooldown_key(user_id, community_id, command))
            .await
            .map_err(lock_unavailable)
    }
}

fn lock_unavailable(e: CoordinationError) -> CoordinationError {
    match e {
        CoordinationError::StoreUnavailable { detail } => {
            CoordinationError::LockUnavailable { detail }
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::MemoryKeyedStore;
    use guildbank_testing::{ManualClock, fixture_time};

    fn client_with_clock() -> (CooldownClient<MemoryKeyedStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let store = MemoryKeyedStore::with_clock(clock.clone());
        (CooldownClient::with_clock(store, clock.clone()), clock)
    }

    #[tokio::test]
    async fn contention_reports_remaining_time() {
        let (client, _clock) = client_with_clock();
        let until = fixture_time() + chrono::Duration::seconds(60);

        assert_eq!(
            client.reserve("u1", "c1", "daily", until).await.unwrap(),
            CooldownDecision::Reserved
        );

        match client.reserve("u1", "c1", "daily", until).await.unwrap() {
            CooldownDecision::Held { remaining } => {
                assert_eq!(remaining, Duration::from_secs(60));
            }
            CooldownDecision::Reserved => panic!("second reservation must not pass"),
        }
    }

    #[tokio::test]
    async fn reservation_frees_after_expiry() {
        let (client, clock) = client_with_clock();
        let until = fixture_time() + chrono::Duration::seconds(60);

        assert_eq!(
            client.reserve("u1", "c1", "daily", until).await.unwrap(),
            CooldownDecision::Reserved
        );

        clock.advance(chrono::Duration::seconds(61));
        let next_until = clock.now() + chrono::Duration::seconds(60);
        assert_eq!(
            client.reserve("u1", "c1", "daily", next_until).await.unwrap(),
            CooldownDecision::Reserved
        );
    }

    #[tokio::test]
    async fn distinct_commands_and_users_do_not_contend() {
        let (client, _clock) = client_with_clock();
        let until = fixture_time() + chrono::Duration::seconds(60);

        assert_eq!(
            client.reserve("u1", "c1", "daily", until).await.unwrap(),
            CooldownDecision::Reserved
        );
        assert_eq!(
            client.reserve("u1", "c1", "weekly", until).await.unwrap(),
            CooldownDecision::Reserved
        );
        assert_eq!(
            client.reserve("u2", "c1", "daily", until).await.unwrap(),
            CooldownDecision::Reserved
        );
    }

    #[tokio::test]
    async fn clear_releases_early() {
        let (client, _clock) = client_with_clock();
        let until = fixture_time() + chrono::Duration::seconds(60);

        client.reserve("u1", "c1", "daily", until).await.unwrap();
        assert!(client.remaining("u1", "c1", "daily").await.unwrap().is_some());

        client.clear("u1", "c1", "daily").await.unwrap();
        assert!(client.remaining("u1", "c1", "daily").await.unwrap().is_none());
        assert_eq!(
            client.reserve("u1", "c1", "daily", until).await.unwrap(),
            CooldownDecision::Reserved
        );
    }

    #[tokio::test]
    async fn past_expiry_reserves_trivially() {
        let (client, _clock) = client_with_clock();
        let past = fixture_time() - chrono::Duration::seconds(5);
        assert_eq!(
            client.reserve("u1", "c1", "daily", past).await.unwrap(),
            CooldownDecision::Reserved
        );
        assert!(client.remaining("u1", "c1", "daily").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outage_surfaces_lock_unavailable() {
        let store = MemoryKeyedStore::new();
        let client = CooldownClient::new(store.clone());
        store.set_unavailable(true);

        let until = Utc::now() + chrono::Duration::seconds(60);
        assert!(matches!(
            client.reserve("u1", "c1", "daily", until).await,
            Err(CoordinationError::LockUnavailable { .. })
        ));
    }
}
