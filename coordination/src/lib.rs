//! # Guildbank Coordination
//!
//! Distributed coordination primitives over a shared keyed store with
//! expiration and atomic conditional writes:
//!
//! - [`lock::LockClient`]: fire-and-forget mutual exclusion and token-owned
//!   exclusive locks with safe release
//! - [`session::SessionClient`]: TTL-bound opaque state blobs for in-flight
//!   interactive commands
//! - [`cooldown::CooldownClient`]: racing-safe per-command cooldown
//!   reservations
//!
//! The store itself is abstracted behind [`store::KeyedStore`]; production
//! uses [`store::RedisKeyedStore`], tests the in-memory
//! [`mocks::MemoryKeyedStore`].
//!
//! These primitives are a cooperative layer: the relational ledger's own
//! row locking is what makes the system correct even if a coordination lock
//! is skipped, lost, or expires early. Acquisition is a single bounded
//! round trip; a store outage degrades to "not acquired", never to a false
//! success.

pub mod cooldown;
pub mod error;
pub mod lock;
pub mod session;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod mocks;

pub use cooldown::{CooldownClient, CooldownDecision};
pub use error::{CoordinationError, Result};
pub use lock::{LockClient, OwnedLock, RefreshHandle};
pub use session::SessionClient;
pub use store::{KeyedStore, RedisKeyedStore, ReserveOutcome};
