//! Core type definitions for ledger transactions.
//!
//! A transaction is one entry in a user's token history. Its `delta` is
//! fixed at creation; only its status moves, and only once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TransactionType
// ---------------------------------------------------------------------------

/// What a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Tokens reserved for a machine. Negative delta.
    Spend,
    /// Tokens bought through a verified payment. Positive delta.
    Purchase,
    /// Tokens returned to a wallet. Positive delta.
    Refund,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spend => write!(f, "spend"),
            Self::Purchase => write!(f, "purchase"),
            Self::Refund => write!(f, "refund"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
///
/// ```text
///            ┌──> Verified   (claimed, tokens consumed)
/// Pending ───┤
///            └──> Failed     (expired, tokens refunded)
/// ```
///
/// Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Reserved and waiting for a machine claim.
    Pending,
    /// Claimed by a machine, or created already settled.
    Verified,
    /// Expired and refunded.
    Failed,
}

impl TransactionStatus {
    /// Returns `true` if no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns `true` if `self -> next` respects monotonicity.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Verified) | (Self::Pending, Self::Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// UUID v4 assigned at creation.
    pub id: String,
    /// Owner of the wallet this transaction moved tokens for.
    pub user_id: String,
    /// Machine the spend was reserved for. `None` for purchases.
    pub machine_id: Option<String>,
    /// Machine display name captured at creation, for history screens.
    pub machine_name: Option<String>,
    /// Signed token movement: negative for spends, positive otherwise.
    pub delta: i64,
    /// What kind of movement this is.
    pub kind: TransactionType,
    /// Where it is in its lifecycle.
    pub status: TransactionStatus,
    /// Receipt reference returned by the payment verifier (purchases only).
    pub payment_reference: Option<String>,
    /// Creation time; the reservation TTL is measured from here.
    pub created_at: DateTime<Utc>,
    /// Database-wide creation sequence. Orders records created in the
    /// same microsecond.
    pub seq: u64,
}

impl Transaction {
    /// Absolute token amount moved.
    pub fn tokens(&self) -> u64 {
        self.delta.unsigned_abs()
    }

    /// Time elapsed between creation and `now`, clamped at zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Returns `true` once the reservation is older than `ttl`.
    ///
    /// A transaction exactly `ttl` old is still live.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age(now) > ttl,
            Err(_) => false,
        }
    }
}

/// Everything needed to open a new [`Transaction`]; the store assigns the
/// id and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: String,
    pub machine_id: Option<String>,
    pub machine_name: Option<String>,
    pub delta: i64,
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub payment_reference: Option<String>,
}

impl NewTransaction {
    /// A pending spend of `tokens` against `machine_id`.
    pub fn spend(user_id: &str, machine_id: &str, machine_name: &str, tokens: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            machine_id: Some(machine_id.to_string()),
            machine_name: Some(machine_name.to_string()),
            delta: -tokens,
            kind: TransactionType::Spend,
            status: TransactionStatus::Pending,
            payment_reference: None,
        }
    }

    /// A settled purchase of `tokens`.
    pub fn purchase(user_id: &str, tokens: i64, display_name: &str, reference: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            machine_id: None,
            machine_name: Some(display_name.to_string()),
            delta: tokens,
            kind: TransactionType::Purchase,
            status: TransactionStatus::Verified,
            payment_reference: Some(reference.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
