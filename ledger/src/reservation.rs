//! # ReservationService: Spend Lifecycle Orchestration
//!
//! Ties the [`Ledger`], the [`TransactionStore`], the
//! [`SignatureVerifier`] and the [`MachineDirectory`] together into the
//! protocol the app and the machines speak:
//!
//! ```text
//!  app: reserve_spend ──> debit + pending spend      (one sled transaction)
//!                              │
//!        ┌─────────────────────┴─────────────────────┐
//!  machine: verify_claim (signed)        machine: sweep_expired_pending (poll)
//!        └─────────────────────┬─────────────────────┘
//!                              ▼
//!                           settle
//!              age <= TTL: pending -> verified
//!              age >  TTL: pending -> failed + refund  (one sled transaction)
//! ```
//!
//! Both claim paths go through one private `settle` step, which reads
//! the record, checks it is still pending, and writes the terminal status
//! (plus the refund, for an expired reservation) in a single transaction
//! over the `wallets`, `transactions` and `pending_by_machine` trees.
//! sled serializes conflicting transactions, so of any number of
//! concurrent claimants exactly one sees `pending`; the rest get
//! [`LedgerError::AlreadyProcessed`].
//!
//! Purchases are the only way tokens enter the system outside of the
//! debug grant, and only after the [`PaymentVerifier`] issues a receipt.

use chrono::{DateTime, Utc};
use sled::{Transactional, Tree};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{
    HISTORY_LIMIT, PAYMENT_VERIFY_TIMEOUT, PURCHASE_DISPLAY_NAME, RESERVATION_TTL,
    RESERVATION_TTL_SECS,
};
use crate::crypto::SignatureVerifier;
use crate::error::{LedgerError, LedgerResult};
use crate::machines::{credits_for, Machine, MachineDirectory, MachineRegistration};
use crate::payment::{PaymentReceipt, PaymentRequest, PaymentVerifier, RejectingPaymentVerifier};
use crate::storage::db::{abort, LedgerDb};
use crate::transaction::store::{insert_in, load_in, materialize, transition_in};
use crate::transaction::{NewTransaction, Transaction, TransactionStatus, TransactionStore};
use crate::validation::{to_delta, validate_amount, validate_id};
use crate::vault::balance::{credit_in, debit_in};
use crate::vault::{Ledger, Wallet};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A freshly opened spend reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub transaction_id: String,
    /// Wallet balance after the debit.
    pub balance: u64,
    /// Seconds the machine has to claim it.
    pub expires_in: u64,
}

/// A recorded purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub transaction_id: String,
    /// Wallet balance after the credit.
    pub balance: u64,
    pub receipt: PaymentReceipt,
}

/// A machine's signed claim on a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub machine_id: String,
    pub user_id: String,
    pub tokens: u64,
    pub transaction_id: String,
}

/// A successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub transaction_id: String,
    /// Machine credits to award.
    pub credits: u64,
}

/// A reservation handed to a polling machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClaim {
    pub transaction_id: String,
    pub tokens: u64,
    pub user_id: String,
}

/// Result of one poll-driven sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Live reservations, now verified, oldest first.
    pub delivered: Vec<PendingClaim>,
    /// Reservations that had expired and were refunded.
    pub expired: usize,
    /// Tokens returned to wallets by this sweep.
    pub refunded_tokens: u64,
}

/// How `settle` resolved a pending reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Verified(Transaction),
    Expired { tx: Transaction, balance: u64 },
}

// ---------------------------------------------------------------------------
// ReservationService
// ---------------------------------------------------------------------------

/// Orchestrates spends, purchases and machine claims.
///
/// Cheap to clone; every clone works on the same database.
#[derive(Clone)]
pub struct ReservationService {
    db: LedgerDb,
    wallets: Tree,
    transactions: Tree,
    tx_by_user: Tree,
    pending_by_machine: Tree,
    ledger: Ledger,
    store: TransactionStore,
    machines: MachineDirectory,
    signatures: SignatureVerifier,
    payments: Arc<dyn PaymentVerifier>,
    payment_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl ReservationService {
    /// A service on the wall clock that refuses every payment.
    pub fn new(db: &LedgerDb, signatures: SignatureVerifier) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            db: db.clone(),
            wallets: db.wallets().clone(),
            transactions: db.transactions().clone(),
            tx_by_user: db.tx_by_user().clone(),
            pending_by_machine: db.pending_by_machine().clone(),
            ledger: Ledger::new(db, clock.clone()),
            store: TransactionStore::new(db, clock.clone()),
            machines: MachineDirectory::new(db),
            signatures,
            payments: Arc::new(RejectingPaymentVerifier),
            payment_timeout: PAYMENT_VERIFY_TIMEOUT,
            clock,
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ledger = Ledger::new(&self.db, clock.clone());
        self.store = TransactionStore::new(&self.db, clock.clone());
        self.clock = clock;
        self
    }

    /// Replaces the payment verifier.
    pub fn with_payment_verifier(mut self, payments: Arc<dyn PaymentVerifier>) -> Self {
        self.payments = payments;
        self
    }

    /// Bounds each payment verification.
    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    pub fn machines(&self) -> &MachineDirectory {
        &self.machines
    }

    pub fn signatures(&self) -> &SignatureVerifier {
        &self.signatures
    }

    /// Name of the configured payment verifier.
    pub fn payment_provider(&self) -> &'static str {
        self.payments.name()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Wallets ------------------------------------------------------------

    /// Get-or-create the user's wallet.
    pub fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        self.ledger.wallet(user_id)
    }

    /// Credits tokens without a payment or a history record.
    ///
    /// For development and tests; the node only routes to it when debug
    /// grants are enabled.
    pub fn grant_tokens(&self, user_id: &str, amount: u64) -> LedgerResult<u64> {
        let balance = self.ledger.credit(user_id, amount)?;
        tracing::info!(user_id, amount, balance, "debug tokens granted");
        Ok(balance)
    }

    // -- Spends -------------------------------------------------------------

    /// Debits `tokens` and opens a pending spend for `machine_id`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for bad ids or a zero amount.
    /// - [`LedgerError::InsufficientTokens`] if the wallet cannot cover it.
    pub fn reserve_spend(
        &self,
        user_id: &str,
        machine_id: &str,
        tokens: u64,
    ) -> LedgerResult<Reservation> {
        validate_id("user_id", user_id)?;
        validate_id("machine_id", machine_id)?;
        let delta = to_delta("tokens", tokens)?;
        self.ledger.wallet(user_id)?;

        let machine_name = self.machines.display_name(machine_id)?;
        let now = self.now();
        let tx = materialize(
            NewTransaction::spend(user_id, machine_id, &machine_name, delta),
            now,
            self.db.next_sequence()?,
        );

        let balance = (
            &self.wallets,
            &self.transactions,
            &self.tx_by_user,
            &self.pending_by_machine,
        )
            .transaction(|(wallets, transactions, tx_by_user, pending_by_machine)| {
                let balance = debit_in(wallets, user_id, tokens, now)?;
                insert_in(transactions, tx_by_user, pending_by_machine, &tx).map(|()| balance)
            })?;

        tracing::info!(
            transaction_id = %tx.id,
            user_id,
            machine_id,
            tokens,
            balance,
            "spend reserved"
        );
        Ok(Reservation {
            transaction_id: tx.id,
            balance,
            expires_in: RESERVATION_TTL_SECS,
        })
    }

    // -- Purchases ----------------------------------------------------------

    /// Credits `tokens` once the payment verifier affirms `proof`.
    ///
    /// A missing proof, a refusal, a verifier error and a verifier that
    /// does not answer within the payment timeout all fail with
    /// [`LedgerError::PaymentRejected`] and credit nothing.
    pub async fn record_purchase(
        &self,
        user_id: &str,
        tokens: u64,
        proof: &str,
    ) -> LedgerResult<Purchase> {
        validate_id("user_id", user_id)?;
        let delta = to_delta("tokens", tokens)?;
        if proof.is_empty() {
            return Err(LedgerError::PaymentRejected("missing payment proof".into()));
        }

        let request = PaymentRequest {
            user_id: user_id.to_string(),
            tokens,
            proof: proof.to_string(),
        };
        let verification = tokio::time::timeout(self.payment_timeout, self.payments.verify(&request));
        let receipt = match verification.await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                tracing::warn!(user_id, tokens, error = %err, "payment rejected");
                return Err(match err {
                    LedgerError::PaymentRejected(_) => err,
                    other => LedgerError::PaymentRejected(other.to_string()),
                });
            }
            Err(_) => {
                tracing::warn!(
                    user_id,
                    tokens,
                    timeout_ms = self.payment_timeout.as_millis() as u64,
                    "payment verification timed out"
                );
                return Err(LedgerError::PaymentRejected(
                    "payment verification timed out".into(),
                ));
            }
        };

        let now = self.now();
        let tx = materialize(
            NewTransaction::purchase(user_id, delta, PURCHASE_DISPLAY_NAME, &receipt.reference),
            now,
            self.db.next_sequence()?,
        );
        let balance = (
            &self.wallets,
            &self.transactions,
            &self.tx_by_user,
            &self.pending_by_machine,
        )
            .transaction(|(wallets, transactions, tx_by_user, pending_by_machine)| {
                let balance = credit_in(wallets, user_id, tokens, now)?;
                insert_in(transactions, tx_by_user, pending_by_machine, &tx).map(|()| balance)
            })?;

        tracing::info!(
            transaction_id = %tx.id,
            user_id,
            tokens,
            balance,
            provider = %receipt.provider,
            reference = %receipt.reference,
            "purchase recorded"
        );
        Ok(Purchase {
            transaction_id: tx.id,
            balance,
            receipt,
        })
    }

    // -- Claims -------------------------------------------------------------

    /// Settles a reservation on a machine's signed claim.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] if the signature does not match the
    ///   claim. Nothing is read or written.
    /// - [`LedgerError::NotFound`] for an unknown transaction.
    /// - [`LedgerError::AlreadyProcessed`] if it is no longer pending.
    /// - [`LedgerError::Expired`] if it outlived the TTL. The refund has
    ///   been committed by the time this is returned.
    pub fn verify_claim(&self, claim: &ClaimRequest, signature: &str) -> LedgerResult<Claim> {
        let authentic = self.signatures.verify(
            &claim.machine_id,
            &claim.user_id,
            claim.tokens,
            &claim.transaction_id,
            signature,
        );
        if !authentic {
            tracing::warn!(
                machine_id = %claim.machine_id,
                transaction_id = %claim.transaction_id,
                "claim rejected: invalid signature"
            );
            return Err(LedgerError::Unauthorized);
        }
        validate_id("machine_id", &claim.machine_id)?;
        validate_id("transaction_id", &claim.transaction_id)?;
        validate_amount("tokens", claim.tokens)?;
        // Read before settling: nothing may fail once the claim has consumed
        // the reservation.
        let rate = self.machines.tokens_per_credit(&claim.machine_id)?;

        let settlement = match self.settle(&claim.transaction_id, Some(&claim.machine_id)) {
            Ok(settlement) => settlement,
            Err(err) => {
                if !err.is_fatal() {
                    tracing::warn!(
                        machine_id = %claim.machine_id,
                        transaction_id = %claim.transaction_id,
                        reason = %err,
                        "claim rejected"
                    );
                }
                return Err(err);
            }
        };

        match settlement {
            Settlement::Verified(tx) => {
                if tx.tokens() != claim.tokens || tx.user_id != claim.user_id {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        reserved_tokens = tx.tokens(),
                        claimed_tokens = claim.tokens,
                        "claim does not match the reservation it settled"
                    );
                }
                let credits = credits_for(claim.tokens, rate);
                tracing::info!(
                    transaction_id = %tx.id,
                    machine_id = %claim.machine_id,
                    user_id = %tx.user_id,
                    credits,
                    "claim verified"
                );
                Ok(Claim {
                    transaction_id: tx.id,
                    credits,
                })
            }
            Settlement::Expired { tx, .. } => Err(LedgerError::Expired {
                refunded: tx.tokens(),
                id: tx.id,
            }),
        }
    }

    /// Resolves every pending reservation for `machine_id`, oldest first.
    ///
    /// Live ones are verified and returned for the machine to deliver;
    /// expired ones are refunded and left out. A storage failure after
    /// the first delivery ends the sweep early and returns what was
    /// committed so far. Polling is not signed: the
    /// endpoint is trusted by deployment topology.
    pub fn sweep_expired_pending(&self, machine_id: &str) -> LedgerResult<SweepOutcome> {
        validate_id("machine_id", machine_id)?;
        let mut outcome = SweepOutcome::default();

        for pending in self.store.list_pending_by_machine(machine_id)? {
            match self.settle(&pending.id, None) {
                Ok(Settlement::Verified(tx)) => outcome.delivered.push(PendingClaim {
                    tokens: tx.tokens(),
                    transaction_id: tx.id,
                    user_id: tx.user_id,
                }),
                Ok(Settlement::Expired { tx, .. }) => {
                    outcome.expired += 1;
                    outcome.refunded_tokens = outcome.refunded_tokens.saturating_add(tx.tokens());
                }
                // Settled or cleared by someone else since the scan.
                Err(LedgerError::AlreadyProcessed { .. } | LedgerError::NotFound(_)) => {}
                // Deliveries already committed as verified must reach the
                // machine; the rest stay pending for the next poll.
                Err(err) if !outcome.delivered.is_empty() => {
                    tracing::error!(
                        machine_id,
                        transaction_id = %pending.id,
                        delivered = outcome.delivered.len(),
                        error = %err,
                        "sweep stopped early"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if !outcome.delivered.is_empty() || outcome.expired > 0 {
            tracing::info!(
                machine_id,
                delivered = outcome.delivered.len(),
                expired = outcome.expired,
                refunded_tokens = outcome.refunded_tokens,
                "pending reservations swept"
            );
        }
        Ok(outcome)
    }

    /// The single read-check-transition step behind both claim paths.
    ///
    /// `claimant`, when given, rebinds the record to that machine.
    fn settle(&self, transaction_id: &str, claimant: Option<&str>) -> LedgerResult<Settlement> {
        let now = self.now();
        let settlement = (&self.wallets, &self.transactions, &self.pending_by_machine)
            .transaction(|(wallets, transactions, pending_by_machine)| {
                let Some(tx) = load_in(transactions, transaction_id)? else {
                    return abort(LedgerError::NotFound(format!(
                        "transaction {transaction_id}"
                    )));
                };
                if tx.status != TransactionStatus::Pending {
                    return abort(LedgerError::AlreadyProcessed {
                        id: tx.id.clone(),
                        status: tx.status,
                    });
                }

                if tx.is_expired(now, RESERVATION_TTL) {
                    let failed = transition_in(
                        transactions,
                        pending_by_machine,
                        &tx,
                        TransactionStatus::Failed,
                        None,
                    )?;
                    let balance = credit_in(wallets, &failed.user_id, failed.tokens(), now)?;
                    return Ok(Settlement::Expired {
                        tx: failed,
                        balance,
                    });
                }

                let verified = transition_in(
                    transactions,
                    pending_by_machine,
                    &tx,
                    TransactionStatus::Verified,
                    claimant,
                )?;
                Ok(Settlement::Verified(verified))
            })?;

        if let Settlement::Expired { tx, balance } = &settlement {
            tracing::info!(
                transaction_id = %tx.id,
                user_id = %tx.user_id,
                refunded = tx.tokens(),
                balance,
                "reservation expired, tokens refunded"
            );
        }
        Ok(settlement)
    }

    // -- History & machines -------------------------------------------------

    /// The user's most recent transactions, newest first.
    pub fn history(&self, user_id: &str) -> LedgerResult<Vec<Transaction>> {
        validate_id("user_id", user_id)?;
        self.store.list_by_user(user_id, HISTORY_LIMIT)
    }

    /// Deletes the user's history. The balance is untouched, and pending
    /// reservations deleted this way are not refunded.
    pub fn clear_history(&self, user_id: &str) -> LedgerResult<usize> {
        let removed = self.store.clear_for_user(user_id)?;
        tracing::info!(user_id, removed, "history cleared");
        Ok(removed)
    }

    /// Inserts or replaces a machine registration.
    pub fn register_machine(&self, registration: MachineRegistration) -> LedgerResult<Machine> {
        self.machines.register(registration)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
