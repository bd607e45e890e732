//! # Machine Claim Signatures
//!
//! A machine proves it is entitled to claim a reservation by presenting
//!
//! ```text
//! hex( SHA-256( secret || "{machine_id}:{user_id}:{tokens}:{transaction_id}" ) )
//! ```
//!
//! where `secret` is shared between the backend and every machine
//! controller. The digest is lowercase hex, 64 characters.
//!
//! Verification compares in constant time and reports only match or
//! mismatch. Which field was wrong is never revealed.

use std::fmt;
use subtle::ConstantTimeEq;

use super::hash::sha256_hex;
use crate::error::{LedgerError, LedgerResult};

// ---------------------------------------------------------------------------
// MachineSecret
// ---------------------------------------------------------------------------

/// The shared secret. Loaded once at startup, never logged.
#[derive(Clone)]
pub struct MachineSecret(String);

impl MachineSecret {
    /// Wraps a secret, rejecting the empty string.
    pub fn new(secret: impl Into<String>) -> LedgerResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(LedgerError::Validation(
                "machine secret must not be empty".into(),
            ));
        }
        Ok(Self(secret))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for MachineSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MachineSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// SignatureVerifier
// ---------------------------------------------------------------------------

/// Checks claim signatures against the shared secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: MachineSecret,
}

impl SignatureVerifier {
    pub fn new(secret: MachineSecret) -> Self {
        Self { secret }
    }

    /// The signature a legitimate machine would present for this claim.
    pub fn sign(&self, machine_id: &str, user_id: &str, tokens: u64, transaction_id: &str) -> String {
        let message = format!("{machine_id}:{user_id}:{tokens}:{transaction_id}");
        sha256_hex(&[self.secret.as_bytes(), message.as_bytes()])
    }

    /// Returns `true` if `presented` is exactly the expected signature.
    pub fn verify(
        &self,
        machine_id: &str,
        user_id: &str,
        tokens: u64,
        transaction_id: &str,
        presented: &str,
    ) -> bool {
        let expected = self.sign(machine_id, user_id, tokens, transaction_id);
        if expected.len() != presented.len() {
            return false;
        }
        expected.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(MachineSecret::new("s3cret").unwrap())
    }

    #[test]
    fn signature_matches_documented_construction() {
        let expected = hex::encode(sha256(b"s3cretM001:alice:3:tx-1"));
        assert_eq!(verifier().sign("M001", "alice", 3, "tx-1"), expected);
    }

    #[test]
    fn valid_signature_verifies() {
        let v = verifier();
        let sig = v.sign("M001", "alice", 3, "tx-1");
        assert!(v.verify("M001", "alice", 3, "tx-1", &sig));
    }

    #[test]
    fn any_changed_field_fails() {
        let v = verifier();
        let sig = v.sign("M001", "alice", 3, "tx-1");
        assert!(!v.verify("M002", "alice", 3, "tx-1", &sig));
        assert!(!v.verify("M001", "bob", 3, "tx-1", &sig));
        assert!(!v.verify("M001", "alice", 4, "tx-1", &sig));
        assert!(!v.verify("M001", "alice", 3, "tx-2", &sig));
    }

    #[test]
    fn different_secret_fails() {
        let other = SignatureVerifier::new(MachineSecret::new("other").unwrap());
        let sig = other.sign("M001", "alice", 3, "tx-1");
        assert!(!verifier().verify("M001", "alice", 3, "tx-1", &sig));
    }

    #[test]
    fn malformed_signatures_fail() {
        let v = verifier();
        let sig = v.sign("M001", "alice", 3, "tx-1");
        assert!(!v.verify("M001", "alice", 3, "tx-1", ""));
        assert!(!v.verify("M001", "alice", 3, "tx-1", &sig[..63]));
        assert!(!v.verify("M001", "alice", 3, "tx-1", &sig.to_uppercase()));
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(matches!(
            MachineSecret::new(""),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let rendered = format!("{:?}", verifier());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("redacted"));
    }
}
