//! Error types for coordination operations.
//!
//! These are soft failures by design: a caller that cannot take a lock or
//! read a session must treat the work as "could not proceed safely" and
//! skip or refund, never double-execute.

use thiserror::Error;

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Failures of the coordination layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The keyed store could not be reached.
    #[error("keyed store unavailable: {detail}")]
    StoreUnavailable {
        /// Underlying failure.
        detail: String,
    },

    /// A lock or cooldown reservation could not be taken or inspected.
    #[error("lock unavailable: {detail}")]
    LockUnavailable {
        /// Underlying failure.
        detail: String,
    },

    /// A session blob could not be stored or fetched.
    #[error("session unavailable: {detail}")]
    SessionUnavailable {
        /// Underlying failure.
        detail: String,
    },

    /// A session payload failed to serialize.
    #[error("serialization error: {detail}")]
    Serialization {
        /// Underlying failure.
        detail: String,
    },
}
