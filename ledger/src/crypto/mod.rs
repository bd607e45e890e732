//! # Cryptographic Primitives
//!
//! The ledger needs exactly one: SHA-256, for the shared-secret claim
//! signatures machine controllers present. Everything here is a thin
//! wrapper around `sha2`, with `subtle` for the comparison.

pub mod hash;
pub mod signature;

pub use hash::{sha256, sha256_hex};
pub use signature::{MachineSecret, SignatureVerifier};
