//! Error types for the ledger.
//!
//! Every ledger operation that can fail returns a [`LedgerError`]. All
//! variants except [`LedgerError::Storage`] are expected outcomes that the
//! caller reports back to the app or machine; none of them leave a partial
//! mutation behind.

use sled::transaction::TransactionError;
use thiserror::Error;

use crate::transaction::types::TransactionStatus;

/// Errors that can occur while mutating or querying the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or missing input. Nothing was changed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The wallet cannot cover the requested spend.
    #[error("insufficient tokens: have {balance}, need {required}")]
    InsufficientTokens {
        /// Balance at the moment of the check.
        balance: u64,
        /// Amount the operation needed.
        required: u64,
    },

    /// The claim signature did not match. Deliberately carries no detail
    /// about which field was wrong.
    #[error("invalid signature")]
    Unauthorized,

    /// No record with the given identifier exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transaction already left `pending`; the claim is a replay.
    #[error("transaction {id} already processed (status {status})")]
    AlreadyProcessed {
        /// The transaction that was claimed.
        id: String,
        /// Its terminal status.
        status: TransactionStatus,
    },

    /// The reservation aged out. Its tokens have been returned to the
    /// wallet as part of the same atomic step.
    #[error("transaction {id} expired, {refunded} tokens refunded")]
    Expired {
        /// The expired transaction.
        id: String,
        /// Tokens credited back to the owner.
        refunded: u64,
    },

    /// A status change that would break monotonicity.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the record currently holds.
        from: TransactionStatus,
        /// Status that was requested.
        to: TransactionStatus,
    },

    /// The payment verifier refused, failed, or timed out.
    #[error("payment rejected: {0}")]
    PaymentRejected(String),

    /// The backing store failed. The only fatal class.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience alias used throughout the crate.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Returns `true` for storage failures, which callers surface as 5xx.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Storage(format!("codec: {err}"))
    }
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => LedgerError::Storage(e.to_string()),
        }
    }
}
