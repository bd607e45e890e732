//! # Wallet Record
//!
//! A [`Wallet`] is a user's token balance. Wallets are created lazily the
//! first time a user id is referenced and are never deleted. The only
//! writer is [`Ledger`](super::balance::Ledger); this module is just the
//! persisted shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_DISPLAY_NAME;

/// A user's token balance.
///
/// The balance is a `u64`, so it cannot go negative; the ledger also
/// refuses any debit the balance cannot cover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Opaque user identifier supplied by the app.
    pub user_id: String,

    /// Name shown in the app.
    pub display_name: String,

    /// Current spendable tokens.
    pub balance: u64,

    /// When the wallet was first referenced.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance-modifying operation.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates a zero-balance wallet with the default display name.
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the wallet holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.balance == 0
    }
}
