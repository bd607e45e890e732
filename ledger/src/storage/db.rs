//! # LedgerDb: Persistent Storage Engine
//!
//! The persistence layer for the ledger, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree                 | Key                                  | Value                  |
//! |----------------------|--------------------------------------|------------------------|
//! | `wallets`            | `user_id` (UTF-8)                    | `bincode(Wallet)`      |
//! | `transactions`       | `tx_id` (UTF-8)                      | `bincode(Transaction)` |
//! | `tx_by_user`         | `user_id \0 created_us seq tx_id`    | `tx_id`                |
//! | `pending_by_machine` | `machine_id \0 created_us seq tx_id` | `tx_id`                |
//! | `machines`           | `machine_id` (UTF-8)                 | `bincode(Machine)`     |
//!
//! Creation times are stored as big-endian microseconds, followed by the
//! record's big-endian creation sequence, so that sled's lexicographic
//! order matches creation order within one owner's prefix, including for
//! records stamped in the same microsecond. A forward prefix scan is oldest-first; a reversed one is
//! newest-first.
//!
//! ## Atomicity
//!
//! Every mutation that touches more than one record (debit + new
//! transaction, status change + refund, record + its index entries) runs
//! inside a single sled multi-tree transaction. sled transactions are
//! serializable and retried on conflict, so a check-then-act inside the
//! closure cannot race with another writer of the same keys.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

/// Separator between the owner id and the time component of index keys.
const KEY_SEPARATOR: u8 = 0;

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for the ledger.
///
/// Wraps a sled `Db` and hands out the named trees to the components that
/// own them. Cloning is cheap: sled handles are reference counted.
///
/// # Thread Safety
///
/// sled is thread-safe; `LedgerDb` can be shared across threads without
/// external synchronization.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    /// The underlying sled database handle.
    db: Db,
    /// Wallets keyed by user id.
    wallets: Tree,
    /// Transaction records keyed by id.
    transactions: Tree,
    /// Index: user -> that user's transactions, ordered by creation.
    tx_by_user: Tree,
    /// Index: machine -> its pending reservations, ordered by creation.
    pending_by_machine: Tree,
    /// Registered machines keyed by id.
    machines: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    ///
    /// Used by unit tests.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            transactions: db.open_tree("transactions")?,
            tx_by_user: db.open_tree("tx_by_user")?,
            pending_by_machine: db.open_tree("pending_by_machine")?,
            machines: db.open_tree("machines")?,
            db,
        })
    }

    pub(crate) fn wallets(&self) -> &Tree {
        &self.wallets
    }

    pub(crate) fn transactions(&self) -> &Tree {
        &self.transactions
    }

    pub(crate) fn tx_by_user(&self) -> &Tree {
        &self.tx_by_user
    }

    pub(crate) fn pending_by_machine(&self) -> &Tree {
        &self.pending_by_machine
    }

    pub(crate) fn machines(&self) -> &Tree {
        &self.machines
    }

    // -- Utility operations -------------------------------------------------

    /// Number of wallets ever referenced.
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Number of transaction records currently stored.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Number of registered machines.
    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Next value of the database-wide monotonic counter. Survives restarts.
    pub(crate) fn next_sequence(&self) -> LedgerResult<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Bincode-encode a record for storage.
pub(crate) fn encode<T: Serialize>(value: &T) -> LedgerResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a stored record.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> LedgerResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// [`encode`] for use inside a sled transaction closure.
pub(crate) fn encode_in<T: Serialize>(
    value: &T,
) -> ConflictableTransactionResult<Vec<u8>, LedgerError> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

/// [`decode`] for use inside a sled transaction closure.
pub(crate) fn decode_in<T: DeserializeOwned>(
    bytes: &[u8],
) -> ConflictableTransactionResult<T, LedgerError> {
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

/// Abort the surrounding sled transaction with a ledger error.
pub(crate) fn abort<T>(err: LedgerError) -> ConflictableTransactionResult<T, LedgerError> {
    Err(ConflictableTransactionError::Abort(err))
}

// ---------------------------------------------------------------------------
// Index keys
// ---------------------------------------------------------------------------

/// `owner \0`: the scan prefix for every index entry of one owner.
pub(crate) fn index_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// `owner \0 created_us seq tx_id`: one index entry.
pub(crate) fn index_key(owner: &str, created_at: DateTime<Utc>, seq: u64, tx_id: &str) -> Vec<u8> {
    let micros = created_at.timestamp_micros().max(0) as u64;
    let mut key = index_prefix(owner);
    key.extend_from_slice(&micros.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
