//! Append-only audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known history reason tags written by the ledger itself.
///
/// The column is free-form; callers record their own tags ("slots-win",
/// "grant", ...) alongside these.
pub mod reasons {
    /// Loan principal credited to the wallet.
    pub const LOAN_TAKE: &str = "loan-take";
    /// Voluntary loan payment drawn from the wallet.
    pub const LOAN_PAYMENT: &str = "loan-payment";
    /// Voluntary loan payment drawn from the bank.
    pub const LOAN_PAYMENT_BANK: &str = "loan-payment-bank";
    /// Loan crossed its due date and turned delinquent.
    pub const LOAN_OVERDUE: &str = "loan-overdue";
    /// Delinquency sweep out of the wallet.
    pub const LOAN_SWEEP_WALLET: &str = "loan-sweep-wallet";
    /// Delinquency sweep out of the bank.
    pub const LOAN_SWEEP_BANK: &str = "loan-sweep-bank";
    /// Debt reached zero and the loan was removed.
    pub const LOAN_CLEARED: &str = "loan-cleared";
    /// Wallet-to-bank move.
    pub const BANK_DEPOSIT: &str = "bank-deposit";
    /// Bank-to-wallet move.
    pub const BANK_WITHDRAW: &str = "bank-withdraw";
    /// Bank capacity upgrade.
    pub const BANK_EXPAND: &str = "bank-expand";
    /// Outgoing side of a transfer.
    pub const TRANSFER_OUT: &str = "transfer-out";
    /// Incoming side of a transfer.
    pub const TRANSFER_IN: &str = "transfer-in";
    /// Administrative balance overwrite.
    pub const SET_BALANCE: &str = "set-balance";
}

/// A persisted audit record. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// Owning community.
    pub community_id: String,
    /// Free-form reason tag.
    pub reason: String,
    /// Optional item involved in the operation.
    pub item_id: Option<String>,
    /// Signed wallet-side amount; zero-amount entries mark notable events.
    pub amount: i64,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// An audit record drafted inside a transaction, before ids and timestamps
/// are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryDraft {
    /// Free-form reason tag.
    pub reason: String,
    /// Optional item involved in the operation.
    pub item_id: Option<String>,
    /// Signed wallet-side amount.
    pub amount: i64,
}

impl HistoryDraft {
    /// Draft an entry with no item reference.
    #[must_use]
    pub fn new(reason: impl Into<String>, amount: i64) -> Self {
        Self {
            reason: reason.into(),
            item_id: None,
            amount,
        }
    }

    /// Attach an item reference.
    #[must_use]
    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}
