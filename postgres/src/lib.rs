//! # Guildbank Postgres
//!
//! The account ledger over `PostgreSQL`: wallet and bank balances, loan
//! lifecycle, transfers, capacity upgrades, and the append-only audit
//! trail.
//!
//! Every mutating or loan-sensitive operation runs inside one row-locked
//! transaction that (1) locks the account (creating it with defaults if
//! absent), (2) normalizes the loan against the injected clock,
//! (3) applies the requested mutation, (4) appends history entries for
//! every change, (5) persists wallet and extension together, and
//! (6) commits. A failure anywhere rolls back all of it; no half-applied
//! state is ever observable.
//!
//! The row lock is the only true mutual-exclusion boundary: concurrent
//! callers targeting the same account serialize on it, and different
//! accounts never contend.
//!
//! # Example
//!
//! ```no_run
//! use guildbank_core::{AccountId, EconomyConfig};
//! use guildbank_postgres::LedgerService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger =
//!     LedgerService::connect("postgres://localhost/guildbank", EconomyConfig::default()).await?;
//! ledger.migrate().await?;
//!
//! let id = AccountId::new("user-1", "community-1");
//! let wallet = ledger.update_balance(&id, 1_000, "grant").await?;
//! assert_eq!(wallet, ledger.get_balance(&id).await?);
//! # Ok(())
//! # }
//! ```

mod bank;
mod cache;
mod ledger;
mod loans;
mod retry;

pub use cache::AccountCache;
pub use ledger::LedgerService;
pub use loans::LoanPayment;
