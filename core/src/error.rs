//! Error taxonomy for ledger operations.
//!
//! Callers branch on the variant, never on message text. Every mutating
//! error guarantees the account row was left exactly as before the call
//! (the enclosing transaction rolls back).

use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Error taxonomy for the ledger and its input validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // ═══════════════════════════════════════════════════════════
    // Input validation (always caller-fixable)
    // ═══════════════════════════════════════════════════════════
    /// The value could not be read as an integer amount.
    #[error("{label} is not a valid amount")]
    InvalidAmount {
        /// Human-readable label of the offending input.
        label: String,
    },

    /// The amount does not fit the ledger's signed 64-bit range.
    #[error("{label} is outside the representable amount range")]
    AmountOutOfRange {
        /// Human-readable label of the offending input.
        label: String,
    },

    /// The amount parsed but was zero or negative.
    #[error("{label} must be greater than zero")]
    AmountNotPositive {
        /// Human-readable label of the offending input.
        label: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Business-rule rejections (transaction rolled back, no partial effect)
    // ═══════════════════════════════════════════════════════════
    /// The operation would drop the wallet below the configured minimum.
    #[error("balance would drop below the configured minimum")]
    MinimumBalanceViolation,

    /// The source balance does not cover the requested amount.
    #[error("insufficient balance")]
    InsufficientBalance,

    // ═══════════════════════════════════════════════════════════
    // Domain-rule rejections
    // ═══════════════════════════════════════════════════════════
    /// The transfer is not allowed in the current account state.
    #[error("transfer blocked: {detail}")]
    TransferBlocked {
        /// Which rule blocked it.
        detail: String,
    },

    /// A deposit would push the bank balance past its capacity.
    #[error("bank capacity exceeded")]
    BankCapacityExceeded,

    /// The account already carries a loan.
    #[error("a loan is already active on this account")]
    LoanAlreadyActive,

    /// The requested loan product is not configured.
    #[error("unknown loan option: {option_id}")]
    LoanOptionInvalid {
        /// The unrecognized product id.
        option_id: String,
    },

    /// There is no loan to pay.
    #[error("no active loan on this account")]
    NoActiveLoan,

    /// Wallet and bank are both empty; nothing can be paid.
    #[error("no funds available")]
    NoFundsAvailable,

    // ═══════════════════════════════════════════════════════════
    // Store faults
    // ═══════════════════════════════════════════════════════════
    /// Connectivity failure that survived the internal retry budget.
    #[error("transient store failure: {detail}")]
    TransientStore {
        /// Last underlying failure.
        detail: String,
    },

    /// Non-transient store fault. Never retried.
    #[error("database error: {detail}")]
    Database {
        /// Underlying failure.
        detail: String,
    },

    /// The extension column or a payload failed to (de)serialize.
    #[error("serialization error: {detail}")]
    Serialization {
        /// Underlying failure.
        detail: String,
    },
}

impl LedgerError {
    /// Returns `true` for rejections the caller can surface to the user
    /// as-is: bad input or a business/domain rule saying no.
    #[must_use]
    pub const fn is_domain_rejection(&self) -> bool {
        !matches!(
            self,
            Self::TransientStore { .. } | Self::Database { .. } | Self::Serialization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_faults_are_not_domain_rejections() {
        assert!(LedgerError::InsufficientBalance.is_domain_rejection());
        assert!(
            LedgerError::LoanOptionInvalid {
                option_id: "starter".into()
            }
            .is_domain_rejection()
        );
        assert!(
            !LedgerError::TransientStore {
                detail: "pool timeout".into()
            }
            .is_domain_rejection()
        );
    }
}
