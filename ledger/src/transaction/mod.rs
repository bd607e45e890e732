//! # Transaction Module
//!
//! Records of every token movement and the lifecycle that governs them.
//!
//! ## Architecture
//!
//! ```text
//! types.rs  Transaction, NewTransaction, TransactionType, TransactionStatus
//! store.rs  TransactionStore: persistence, indexes, status transitions
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Reserve**: a spend is created `pending` with a negative delta; the
//!    tokens have already left the wallet.
//! 2. **Claim**: a machine presents a signed claim (or polls) and the
//!    record becomes `verified`.
//! 3. **Expire**: a claim that arrives after the TTL turns the record
//!    `failed` and refunds it instead.
//!
//! Purchases are created `verified` and never move.

pub mod store;
pub mod types;

pub use store::TransactionStore;
pub use types::{NewTransaction, Transaction, TransactionStatus, TransactionType};
