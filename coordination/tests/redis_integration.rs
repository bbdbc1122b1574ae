//! Integration tests against a real Redis instance.
//!
//! These exercise the Lua compare-then-act paths that the in-memory store
//! can only approximate.
//!
//! Run with: docker run -d -p 6379:6379 redis:7-alpine
//! then: cargo test -p guildbank-coordination -- --ignored

#![allow(clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use guildbank_coordination::{
    CooldownDecision, CooldownClient, KeyedStore, LockClient, RedisKeyedStore, SessionClient,
};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn store() -> RedisKeyedStore {
    RedisKeyedStore::connect(REDIS_URL).await.unwrap()
}

fn unique(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn owned_lock_round_trip() {
    let client = LockClient::new(store().await);
    let key = unique("test:lock");

    let lock = client
        .acquire_owned(&key, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(client.acquire_owned(&key, Duration::from_secs(30)).await.is_none());

    client.release_owned(&lock).await;
    let relock = client
        .acquire_owned(&key, Duration::from_secs(30))
        .await
        .unwrap();
    client.release_owned(&relock).await;
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn compare_and_delete_spares_foreign_values() {
    let store = store().await;
    let key = unique("test:cad");

    assert!(
        store
            .set_if_absent(&key, "owner-a", Duration::from_secs(30))
            .await
            .unwrap()
    );
    assert!(!store.compare_and_delete(&key, "owner-b").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("owner-a"));
    assert!(store.compare_and_delete(&key, "owner-a").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn compare_and_extend_refreshes_ttl() {
    let store = store().await;
    let key = unique("test:cae");

    store
        .set_if_absent(&key, "owner-a", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(
        store
            .compare_and_extend(&key, "owner-a", Duration::from_secs(120))
            .await
            .unwrap()
    );
    let remaining = store.ttl_remaining(&key).await.unwrap().unwrap();
    assert!(remaining > Duration::from_secs(100));

    assert!(
        !store
            .compare_and_extend(&key, "owner-b", Duration::from_secs(5))
            .await
            .unwrap()
    );
    store.delete(&key).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn cooldown_reservation_is_atomic() {
    let client = CooldownClient::new(store().await);
    let user = unique("user");
    let until = chrono::Utc::now() + chrono::Duration::seconds(60);

    assert_eq!(
        client.reserve(&user, "c1", "daily", until).await.unwrap(),
        CooldownDecision::Reserved
    );
    match client.reserve(&user, "c1", "daily", until).await.unwrap() {
        CooldownDecision::Held { remaining } => {
            assert!(remaining <= Duration::from_secs(60));
            assert!(remaining > Duration::from_secs(55));
        }
        CooldownDecision::Reserved => panic!("second reservation must not pass"),
    }

    client.clear(&user, "c1", "daily").await.unwrap();
    assert!(client.remaining(&user, "c1", "daily").await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn concurrent_session_and_lock_do_not_collide() {
    let backing = store().await;
    let locks = LockClient::new(backing.clone());
    let sessions = SessionClient::new(backing);
    let key = unique("blackjack");

    let lock = locks.acquire_owned(&key, Duration::from_secs(30)).await.unwrap();
    sessions
        .put(&key, "msg-1", &vec![1u8, 2, 3], Duration::from_secs(30))
        .await
        .unwrap();

    let restored: Option<Vec<u8>> = sessions.get(&key, "msg-1").await.unwrap();
    assert_eq!(restored, Some(vec![1, 2, 3]));

    sessions.delete(&key, "msg-1").await.unwrap();
    locks.release_owned(&lock).await;
}
