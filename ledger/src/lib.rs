// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ArcadePay Ledger: Core Library
//!
//! The backend of record for arcade tokens. Three parties talk to it and
//! none of them trust each other: the mobile app spends and buys tokens,
//! the machine controller redeems them, and this ledger decides what the
//! balance actually is.
//!
//! ## Architecture
//!
//! - **vault**: Wallets and the [`Ledger`] that debits and credits them.
//! - **transaction**: Transaction records and the [`TransactionStore`].
//! - **crypto**: SHA-256 claim signatures and the [`SignatureVerifier`].
//! - **machines**: The [`MachineDirectory`] of names and conversion rates.
//! - **payment**: The [`PaymentVerifier`] seam for purchases.
//! - **reservation**: The [`ReservationService`] that runs the spend
//!   lifecycle on top of everything above.
//! - **storage**: The sled database all of it lives in.
//! - **clock**: Injectable time, so expiry can be tested.
//! - **config**: Protocol constants.
//!
//! ## Ground Rules
//!
//! 1. A balance is never negative.
//! 2. Anything that moves tokens and writes a record does both or neither.
//! 3. A reservation settles once: verified or refunded, never both.
//! 4. If it touches tokens, it has tests. Plural.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod machines;
pub mod payment;
pub mod reservation;
pub mod storage;
pub mod transaction;
pub mod validation;
pub mod vault;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{MachineSecret, SignatureVerifier};
pub use error::{LedgerError, LedgerResult};
pub use machines::{Machine, MachineDirectory, MachineRegistration};
pub use payment::{
    DemoPaymentVerifier, PaymentReceipt, PaymentRequest, PaymentVerifier,
    RejectingPaymentVerifier,
};
pub use reservation::{
    Claim, ClaimRequest, PendingClaim, Purchase, Reservation, ReservationService, SweepOutcome,
};
pub use storage::LedgerDb;
pub use transaction::{Transaction, TransactionStatus, TransactionStore, TransactionType};
pub use vault::{Ledger, Wallet};
