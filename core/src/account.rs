//! The account aggregate and its JSON extension column.
//!
//! An account row is `wallet` plus one JSONB `extension` value. The
//! extension carries the strongly-typed sub-fields this crate owns (bank
//! state, loan, grow timestamp) and an open map for fields owned by
//! out-of-scope collaborators, which must round-trip untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BankConfig;
use crate::loan::Loan;

/// Identifies one account: one per (user, community) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    /// Platform user id.
    pub user_id: String,
    /// Community (guild/server) id.
    pub community_id: String,
}

impl AccountId {
    /// Create an account id.
    pub fn new(user_id: impl Into<String>, community_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            community_id: community_id.into(),
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community_id, self.user_id)
    }
}

/// Bank sub-state stored in the extension column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankState {
    /// Funds held in the bank, `0 ≤ balance ≤ max`.
    #[serde(default)]
    pub balance: i64,
    /// Stored capacity; read through the configured floor, and
    /// monotonically non-decreasing.
    #[serde(default)]
    pub max: i64,
}

/// The JSON side-column of an account row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountExtension {
    /// Bank balance and capacity.
    #[serde(default)]
    pub bank: BankState,

    /// The account's loan, if any. At most one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan: Option<Loan>,

    /// When the daily grow reward was last claimed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_grow_at: Option<DateTime<Utc>>,

    /// Fields owned by collaborators outside the ledger. Preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One (user, community) account.
///
/// Created implicitly with zeroed defaults on first access; never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Owning (user, community) pair.
    pub id: AccountId,
    /// Liquid funds, `≥ min_balance` unless a delinquent loan redirected
    /// them.
    pub wallet: i64,
    /// The JSON side-column.
    pub extension: AccountExtension,
}

impl Account {
    /// A fresh account with zeroed defaults.
    #[must_use]
    pub fn new(id: AccountId, default_balance: i64) -> Self {
        Self {
            id,
            wallet: default_balance,
            extension: AccountExtension::default(),
        }
    }

    /// Effective bank capacity: the stored value read through the
    /// configured floor.
    #[must_use]
    pub fn bank_max(&self, config: &BankConfig) -> i64 {
        self.extension.bank.max.max(config.default_max)
    }

    /// Wallet plus bank.
    #[must_use]
    pub const fn available_funds(&self) -> i64 {
        self.wallet.saturating_add(self.extension.bank.balance)
    }
}

/// Capacity gained by a single upgrade unit at the given level.
#[must_use]
pub fn capacity_increase(current_max: i64, level: i64, config: &BankConfig) -> i64 {
    let growth = crate::loan::bps_share(current_max, config.growth_bps)
        .saturating_add(level.saturating_mul(config.per_level_bonus));
    growth.max(config.min_increase)
}

/// Capacity after applying `quantity` upgrade units, each compounding off
/// the capacity left by the previous one.
#[must_use]
pub fn expanded_max(current_max: i64, quantity: u32, level: i64, config: &BankConfig) -> i64 {
    let mut max = current_max;
    for _ in 0..quantity {
        max = max.saturating_add(capacity_increase(max, level, config));
    }
    max
}
