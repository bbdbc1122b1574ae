//! # Guildbank Core
//!
//! Domain types and pure business rules for the guildbank economy: accounts,
//! bank state, loans, monetary amount parsing, and the error taxonomy shared
//! by the storage crates.
//!
//! This crate performs no I/O. Time is injected through
//! [`environment::Clock`], and the loan state machine is a pure function
//! ([`loan::normalize`]) so that every transition is testable with a fixed
//! clock.
//!
//! ## Crate layout
//!
//! - [`account`]: the account aggregate and its JSON extension column
//! - [`amount`]: parsing/rendering of integer monetary amounts
//! - [`loan`]: loan state machine and lazy normalization
//! - [`history`]: append-only audit records
//! - [`config`]: economy configuration
//! - [`error`]: the ledger error taxonomy

pub mod account;
pub mod amount;
pub mod config;
pub mod environment;
pub mod error;
pub mod history;
pub mod loan;

pub use account::{Account, AccountExtension, AccountId, BankState};
pub use config::{BankConfig, EconomyConfig, LoanConfig};
pub use environment::{Clock, SystemClock};
pub use error::{LedgerError, Result};
pub use history::{HistoryDraft, HistoryEntry};
pub use loan::{Loan, LoanEvent, LoanOption, LoanStatus, NormalizeOutcome};
