//! # TransactionStore
//!
//! Owns transaction records, their two secondary indexes, and the one rule
//! that governs them: a status moves from `pending` to a terminal state
//! exactly once.
//!
//! A record and its index entries are always written in the same sled
//! transaction. The `tx_by_user` index holds every record of a user; the
//! `pending_by_machine` index holds only records that are still pending,
//! so leaving `pending` also removes the entry.

use chrono::{DateTime, Utc};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Transactional, Tree};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{NewTransaction, Transaction, TransactionStatus};
use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::db::{abort, decode, decode_in, encode_in, index_key, index_prefix, LedgerDb};
use crate::validation::validate_id;

/// Typed access to the `transactions`, `tx_by_user` and
/// `pending_by_machine` trees.
#[derive(Clone)]
pub struct TransactionStore {
    db: LedgerDb,
    transactions: Tree,
    tx_by_user: Tree,
    pending_by_machine: Tree,
    clock: Arc<dyn Clock>,
}

impl TransactionStore {
    pub fn new(db: &LedgerDb, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: db.clone(),
            transactions: db.transactions().clone(),
            tx_by_user: db.tx_by_user().clone(),
            pending_by_machine: db.pending_by_machine().clone(),
            clock,
        }
    }

    /// Allocates an id, stamps the creation time and persists the record
    /// together with its index entries.
    pub fn create(&self, new: NewTransaction) -> LedgerResult<Transaction> {
        validate_id("user_id", &new.user_id)?;
        if let Some(machine_id) = &new.machine_id {
            validate_id("machine_id", machine_id)?;
        }
        let tx = materialize(new, self.clock.now(), self.db.next_sequence()?);

        (&self.transactions, &self.tx_by_user, &self.pending_by_machine).transaction(
            |(transactions, tx_by_user, pending_by_machine)| {
                insert_in(transactions, tx_by_user, pending_by_machine, &tx)
            },
        )?;
        Ok(tx)
    }

    /// Returns the record, or [`LedgerError::NotFound`].
    pub fn get(&self, id: &str) -> LedgerResult<Transaction> {
        match self.transactions.get(id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(LedgerError::NotFound(format!("transaction {id}"))),
        }
    }

    /// Moves a record to `status`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTransition`] unless the record is pending and
    /// `status` is terminal.
    pub fn set_status(&self, id: &str, status: TransactionStatus) -> LedgerResult<Transaction> {
        validate_id("transaction_id", id)?;
        let updated = (&self.transactions, &self.pending_by_machine).transaction(
            |(transactions, pending_by_machine)| {
                let Some(current) = load_in(transactions, id)? else {
                    return abort(LedgerError::NotFound(format!("transaction {id}")));
                };
                transition_in(transactions, pending_by_machine, &current, status, None)
            },
        )?;
        Ok(updated)
    }

    /// The user's records, newest first, at most `limit` of them.
    pub fn list_by_user(&self, user_id: &str, limit: usize) -> LedgerResult<Vec<Transaction>> {
        let mut out = Vec::new();
        for entry in self.tx_by_user.scan_prefix(index_prefix(user_id)).rev() {
            if out.len() >= limit {
                break;
            }
            let (_, tx_id) = entry?;
            // An index entry can outlive its record for the instant between
            // a concurrent clear's scan and its commit.
            if let Some(bytes) = self.transactions.get(&tx_id)? {
                out.push(decode(&bytes)?);
            }
        }
        Ok(out)
    }

    /// The machine's pending reservations, oldest first.
    pub fn list_pending_by_machine(&self, machine_id: &str) -> LedgerResult<Vec<Transaction>> {
        let mut out = Vec::new();
        for entry in self.pending_by_machine.scan_prefix(index_prefix(machine_id)) {
            let (_, tx_id) = entry?;
            if let Some(bytes) = self.transactions.get(&tx_id)? {
                let tx: Transaction = decode(&bytes)?;
                if tx.status == TransactionStatus::Pending {
                    out.push(tx);
                }
            }
        }
        Ok(out)
    }

    /// Deletes every record the user owns, pending ones included. The
    /// wallet is not touched. Returns the number of records removed.
    pub fn clear_for_user(&self, user_id: &str) -> LedgerResult<usize> {
        validate_id("user_id", user_id)?;
        let keys = self
            .tx_by_user
            .scan_prefix(index_prefix(user_id))
            .map(|entry| entry.map(|(key, tx_id)| (key.to_vec(), tx_id.to_vec())))
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Ok(0);
        }

        let removed = (&self.transactions, &self.tx_by_user, &self.pending_by_machine)
            .transaction(|(transactions, tx_by_user, pending_by_machine)| {
                let mut removed = 0;
                for (key, tx_id) in &keys {
                    tx_by_user.remove(key.as_slice())?;
                    let Some(bytes) = transactions.remove(tx_id.as_slice())? else {
                        continue;
                    };
                    let tx: Transaction = decode_in(&bytes)?;
                    if let (TransactionStatus::Pending, Some(machine_id)) =
                        (tx.status, &tx.machine_id)
                    {
                        pending_by_machine
                            .remove(index_key(machine_id, tx.created_at, tx.seq, &tx.id))?;
                    }
                    removed += 1;
                }
                Ok::<_, ConflictableTransactionError<LedgerError>>(removed)
            })?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-transaction operations
// ---------------------------------------------------------------------------

/// Turns a creation request into a record with a fresh UUID v4.
///
/// `seq` comes from [`LedgerDb::next_sequence`].
pub(crate) fn materialize(new: NewTransaction, now: DateTime<Utc>, seq: u64) -> Transaction {
    Transaction {
        id: Uuid::new_v4().to_string(),
        user_id: new.user_id,
        machine_id: new.machine_id,
        machine_name: new.machine_name,
        delta: new.delta,
        kind: new.kind,
        status: new.status,
        payment_reference: new.payment_reference,
        created_at: now,
        seq,
    }
}

/// Writes a new record and its index entries.
pub(crate) fn insert_in(
    transactions: &TransactionalTree,
    tx_by_user: &TransactionalTree,
    pending_by_machine: &TransactionalTree,
    tx: &Transaction,
) -> ConflictableTransactionResult<(), LedgerError> {
    transactions.insert(tx.id.as_bytes(), encode_in(tx)?)?;
    tx_by_user.insert(
        index_key(&tx.user_id, tx.created_at, tx.seq, &tx.id),
        tx.id.as_bytes(),
    )?;
    if let (TransactionStatus::Pending, Some(machine_id)) = (tx.status, &tx.machine_id) {
        pending_by_machine.insert(
            index_key(machine_id, tx.created_at, tx.seq, &tx.id),
            tx.id.as_bytes(),
        )?;
    }
    Ok(())
}

/// Reads a record inside a transaction.
pub(crate) fn load_in(
    transactions: &TransactionalTree,
    id: &str,
) -> ConflictableTransactionResult<Option<Transaction>, LedgerError> {
    match transactions.get(id.as_bytes())? {
        Some(bytes) => Ok(Some(decode_in(&bytes)?)),
        None => Ok(None),
    }
}

/// Applies a status change to `current` and persists it.
///
/// When `machine_id` is given the record is rebound to that machine. The
/// pending index entry, keyed by the machine the record was created for,
/// is dropped when the record leaves `pending`.
pub(crate) fn transition_in(
    transactions: &TransactionalTree,
    pending_by_machine: &TransactionalTree,
    current: &Transaction,
    status: TransactionStatus,
    machine_id: Option<&str>,
) -> ConflictableTransactionResult<Transaction, LedgerError> {
    if !current.status.can_transition_to(status) {
        return abort(LedgerError::InvalidTransition {
            from: current.status,
            to: status,
        });
    }

    if let Some(old_machine) = &current.machine_id {
        pending_by_machine.remove(index_key(
            old_machine,
            current.created_at,
            current.seq,
            &current.id,
        ))?;
    }

    let mut updated = current.clone();
    updated.status = status;
    if let Some(machine_id) = machine_id {
        updated.machine_id = Some(machine_id.to_string());
    }
    transactions.insert(updated.id.as_bytes(), encode_in(&updated)?)?;
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
