//! # Ledger: Wallet Balance Mutation
//!
//! The [`Ledger`] is the only writer of wallet balances. It exposes three
//! operations (`debit`, `credit`, `balance`) and enforces the invariant
//! that a balance never goes below zero.
//!
//! Each operation is a sled transaction over the `wallets` tree: the
//! get-or-create, the sufficiency check and the write are one indivisible
//! step, so two concurrent debits against the same wallet cannot both pass
//! the check against a stale balance.
//!
//! The `*_in` functions do the same work inside a caller's multi-tree
//! transaction. [`ReservationService`](crate::reservation::ReservationService)
//! uses them to debit and open a reservation (or refund and close one)
//! atomically.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Tree;
use std::sync::Arc;

use super::wallet::Wallet;
use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::db::{abort, decode, decode_in, encode_in, LedgerDb};
use crate::validation::{validate_amount, validate_id};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Owner of all wallet balances.
#[derive(Clone)]
pub struct Ledger {
    wallets: Tree,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Creates a ledger over the `wallets` tree of `db`.
    pub fn new(db: &LedgerDb, clock: Arc<dyn Clock>) -> Self {
        Self {
            wallets: db.wallets().clone(),
            clock,
        }
    }

    /// Returns the wallet for `user_id`, creating it at balance 0 if absent.
    ///
    /// Reads have a creation side effect: the first reference to a user
    /// makes their wallet exist.
    pub fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        validate_id("user_id", user_id)?;
        let now = self.clock.now();
        Ok(self
            .wallets
            .transaction(|wallets| upsert_in(wallets, user_id, now))?)
    }

    /// Returns the balance for `user_id`, creating the wallet if absent.
    pub fn balance(&self, user_id: &str) -> LedgerResult<u64> {
        Ok(self.wallet(user_id)?.balance)
    }

    /// Reads a wallet without creating it.
    pub fn get(&self, user_id: &str) -> LedgerResult<Option<Wallet>> {
        match self.wallets.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Adds `amount` tokens to the wallet and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for a zero amount or a credit that would
    /// overflow `u64`.
    pub fn credit(&self, user_id: &str, amount: u64) -> LedgerResult<u64> {
        validate_id("user_id", user_id)?;
        validate_amount("amount", amount)?;
        let now = self.clock.now();
        let balance = self
            .wallets
            .transaction(|wallets| credit_in(wallets, user_id, amount, now))?;
        tracing::debug!(user_id, amount, balance, "wallet credited");
        Ok(balance)
    }

    /// Removes `amount` tokens from the wallet and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientTokens`] if the balance cannot cover the
    /// debit; nothing is written in that case.
    pub fn debit(&self, user_id: &str, amount: u64) -> LedgerResult<u64> {
        validate_id("user_id", user_id)?;
        validate_amount("amount", amount)?;
        let now = self.clock.now();
        let balance = self
            .wallets
            .transaction(|wallets| debit_in(wallets, user_id, amount, now))?;
        tracing::debug!(user_id, amount, balance, "wallet debited");
        Ok(balance)
    }
}

// ---------------------------------------------------------------------------
// In-transaction operations
// ---------------------------------------------------------------------------

/// Loads the wallet inside a transaction, inserting a fresh one if absent.
pub(crate) fn upsert_in(
    wallets: &TransactionalTree,
    user_id: &str,
    now: DateTime<Utc>,
) -> ConflictableTransactionResult<Wallet, LedgerError> {
    match wallets.get(user_id.as_bytes())? {
        Some(bytes) => decode_in(&bytes),
        None => {
            let wallet = Wallet::new(user_id, now);
            wallets.insert(user_id.as_bytes(), encode_in(&wallet)?)?;
            Ok(wallet)
        }
    }
}

/// Credits inside a transaction. Returns the new balance.
pub(crate) fn credit_in(
    wallets: &TransactionalTree,
    user_id: &str,
    amount: u64,
    now: DateTime<Utc>,
) -> ConflictableTransactionResult<u64, LedgerError> {
    let mut wallet = upsert_in(wallets, user_id, now)?;
    let Some(balance) = wallet.balance.checked_add(amount) else {
        return abort(LedgerError::Validation(format!(
            "credit of {amount} would overflow balance {}",
            wallet.balance
        )));
    };
    wallet.balance = balance;
    wallet.updated_at = now;
    wallets.insert(user_id.as_bytes(), encode_in(&wallet)?)?;
    Ok(balance)
}

/// Debits inside a transaction. Aborts with
/// [`LedgerError::InsufficientTokens`] if the balance is short.
pub(crate) fn debit_in(
    wallets: &TransactionalTree,
    user_id: &str,
    amount: u64,
    now: DateTime<Utc>,
) -> ConflictableTransactionResult<u64, LedgerError> {
    let mut wallet = upsert_in(wallets, user_id, now)?;
    if wallet.balance < amount {
        return abort(LedgerError::InsufficientTokens {
            balance: wallet.balance,
            required: amount,
        });
    }
    wallet.balance -= amount;
    wallet.updated_at = now;
    wallets.insert(user_id.as_bytes(), encode_in(&wallet)?)?;
    Ok(wallet.balance)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn ledger() -> Ledger {
        let db = LedgerDb::open_temporary().expect("temp db");
        Ledger::new(&db, Arc::new(SystemClock))
    }

    #[test]
    fn balance_creates_wallet_at_zero() {
        let ledger = ledger();
        assert!(ledger.get("alice").unwrap().is_none());

        assert_eq!(ledger.balance("alice").unwrap(), 0);
        let wallet = ledger.get("alice").unwrap().expect("created on read");
        assert_eq!(wallet.display_name, "Player");
    }

    #[test]
    fn credit_accumulates() {
        let ledger = ledger();
        assert_eq!(ledger.credit("alice", 500).unwrap(), 500);
        assert_eq!(ledger.credit("alice", 300).unwrap(), 800);
        assert_eq!(ledger.balance("alice").unwrap(), 800);
    }

    #[test]
    fn credit_overflow_rejected() {
        let ledger = ledger();
        ledger.credit("alice", u64::MAX).unwrap();
        let result = ledger.credit("alice", 1);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(ledger.balance("alice").unwrap(), u64::MAX);
    }

    #[test]
    fn debit_reduces_balance() {
        let ledger = ledger();
        ledger.credit("alice", 1000).unwrap();
        assert_eq!(ledger.debit("alice", 400).unwrap(), 600);
        assert_eq!(ledger.balance("alice").unwrap(), 600);
    }

    #[test]
    fn debit_to_zero() {
        let ledger = ledger();
        ledger.credit("alice", 500).unwrap();
        assert_eq!(ledger.debit("alice", 500).unwrap(), 0);
    }

    #[test]
    fn debit_insufficient_balance_rejected() {
        let ledger = ledger();
        ledger.credit("alice", 100).unwrap();

        let result = ledger.debit("alice", 200);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientTokens {
                balance: 100,
                required: 200
            })
        ));
        assert_eq!(ledger.balance("alice").unwrap(), 100);
    }

    #[test]
    fn debit_on_unknown_wallet_creates_it_and_fails() {
        let ledger = ledger();
        let result = ledger.debit("bob", 1);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientTokens { balance: 0, .. })
        ));
    }

    #[test]
    fn zero_amounts_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.credit("alice", 0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit("alice", 0),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn wallets_are_independent() {
        let ledger = ledger();
        ledger.credit("alice", 10).unwrap();
        ledger.credit("bob", 3).unwrap();
        ledger.debit("alice", 4).unwrap();

        assert_eq!(ledger.balance("alice").unwrap(), 6);
        assert_eq!(ledger.balance("bob").unwrap(), 3);
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        use std::thread;

        let ledger = ledger();
        ledger.credit("alice", 10).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || ledger.debit("alice", 3).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("debit thread should not panic"))
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(ledger.balance("alice").unwrap(), 1);
    }
}
