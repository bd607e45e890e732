//! # Storage Module
//!
//! Persistent storage for the ledger. One sled database holds every
//! record; the components that own each record type borrow its trees.
//!
//! ```text
//! Ledger           -> wallets
//! TransactionStore -> transactions, tx_by_user, pending_by_machine
//! MachineDirectory -> machines
//! ```
//!
//! Values are bincode; JSON is for the HTTP surface only.

pub mod db;

pub use db::LedgerDb;
