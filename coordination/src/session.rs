//! TTL-bound session blobs for in-flight interactive commands.
//!
//! One blob per (session type, message id): the serialized, resumable state
//! of a multi-step command instance, e.g. a card game mid-hand. The blob's
//! internal shape is owned by the game logic; this layer only guarantees
//! atomic, TTL-bound storage and retrieval.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CoordinationError, Result};
use crate::store::KeyedStore;

fn session_key(session_type: &str, message_id: &str) -> String {
    format!("session:{session_type}:{message_id}")
}

/// Client for session blob storage over a keyed store.
#[derive(Debug, Clone)]
pub struct SessionClient<S> {
    store: S,
}

impl<S: KeyedStore> SessionClient<S> {
    /// Create a session client.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Serialize and store a session state with the given TTL.
    ///
    /// A failure here is non-fatal to the caller, which must treat it as
    /// "session could not be started/continued" and refund or cancel.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::Serialization`] if the state cannot be
    /// serialized, [`CoordinationError::SessionUnavailable`] if the store
    /// cannot be reached.
    pub async fn put<T: Serialize + Sync>(
        &self,
        session_type: &str,
        message_id: &str,
        state: &T,
        ttl: Duration,
    ) -> Result<()> {
        let blob = serde_json::to_string(state).map_err(|e| CoordinationError::Serialization {
            detail: e.to_string(),
        })?;
        self.store
            .set(&session_key(session_type, message_id), &blob, ttl)
            .await
            .map_err(session_unavailable)
    }

    /// Fetch and deserialize a session state.
    ///
    /// Absent, expired, and corrupt blobs all come back as `None`: session
    /// data crosses a serialization boundary and must tolerate format
    /// drift, so a payload that no longer parses is treated as if it had
    /// expired.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::SessionUnavailable`] if the store cannot be
    /// reached (the caller must fail safe rather than assume "no session").
    pub async fn get<T: DeserializeOwned>(
        &self,
        session_type: &str,
        message_id: &str,
    ) -> Result<Option<T>> {
        let key = session_key(session_type, message_id);
        let Some(blob) = self.store.get(&key).await.map_err(session_unavailable)? else {
            return Ok(None);
        };
        match serde_json::from_str(&blob) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding corrupt session blob");
                Ok(None)
            }
        }
    }

    /// Delete a session state.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::SessionUnavailable`] if the store cannot be
    /// reached.
    pub async fn delete(&self, session_type: &str, message_id: &str) -> Result<()> {
        self.store
            .delete(&session_key(session_type, message_id))
            .await
            .map_err(session_unavailable)
    }
}

fn session_unavailable(e: CoordinationError) -> CoordinationError {
    match e {
        CoordinationError::StoreUnavailable { detail } => {
            CoordinationError::SessionUnavailable { detail }
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MemoryKeyedStore;
    use guildbank_testing::{ManualClock, fixture_time};
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct BlackjackHand {
        player: Vec<u8>,
        dealer: Vec<u8>,
        stake: i64,
    }

    fn hand() -> BlackjackHand {
        BlackjackHand {
            player: vec![10, 7],
            dealer: vec![9],
            stake: 250,
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn round_trips_a_blob() {
        let client = SessionClient::new(MemoryKeyedStore::new());

        client.put("blackjack", "msg-1", &hand(), TTL).await.unwrap();
        let restored: Option<BlackjackHand> = client.get("blackjack", "msg-1").await.unwrap();
        assert_eq!(restored, Some(hand()));

        client.delete("blackjack", "msg-1").await.unwrap();
        let gone: Option<BlackjackHand> = client.get("blackjack", "msg-1").await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn expired_blob_reads_as_absent() {
        let clock = Arc::new(ManualClock::new(fixture_time()));
        let client = SessionClient::new(MemoryKeyedStore::with_clock(clock.clone()));

        client.put("blackjack", "msg-1", &hand(), TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(301));

        let restored: Option<BlackjackHand> = client.get("blackjack", "msg-1").await.unwrap();
        assert_eq!(restored, None);
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_absent() {
        let store = MemoryKeyedStore::new();
        let client = SessionClient::new(store.clone());

        // Simulate format drift: an older process wrote a different shape.
        store
            .set("session:blackjack:msg-1", "{\"cards\": 3}", TTL)
            .await
            .unwrap();

        let restored: Option<BlackjackHand> = client.get("blackjack", "msg-1").await.unwrap();
        assert_eq!(restored, None);
    }

    #[tokio::test]
    async fn outage_surfaces_session_unavailable() {
        let store = MemoryKeyedStore::new();
        let client = SessionClient::new(store.clone());
        store.set_unavailable(true);

        assert!(matches!(
            client.put("blackjack", "msg-1", &hand(), TTL).await,
            Err(CoordinationError::SessionUnavailable { .. })
        ));
        assert!(matches!(
            client.get::<BlackjackHand>("blackjack", "msg-1").await,
            Err(CoordinationError::SessionUnavailable { .. })
        ));
    }
}
