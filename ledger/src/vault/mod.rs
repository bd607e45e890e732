//! # Vault Module: Wallets & Balances
//!
//! The vault is where tokens live. Every balance change in the system
//! passes through [`Ledger`]: purchases and refunds credit, reservations
//! debit, and nothing else touches a wallet.
//!
//! ```text
//! wallet.rs   the persisted Wallet record
//! balance.rs  Ledger: atomic debit / credit / get-or-create
//! ```
//!
//! All amounts are `u64` whole tokens. There is one currency and no
//! fractional arithmetic.

pub mod balance;
pub mod wallet;

pub use balance::Ledger;
pub use wallet::Wallet;
