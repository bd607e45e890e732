//! # Hashing Utilities
//!
//! SHA-256 is the only hash the ledger uses: machine controllers compute
//! claim signatures with it, so the backend must match byte for byte.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 over several parts, as if they were concatenated.
///
/// Saves building an intermediate buffer when the parts already exist
/// separately (a secret and a message, for instance).
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Lowercase hex encoding of [`sha256_multi`].
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    hex::encode(sha256_multi(parts))
}
