//! # Payment Verification
//!
//! Tokens are only ever minted by a purchase, and a purchase is only ever
//! recorded after a [`PaymentVerifier`] returns a [`PaymentReceipt`] for
//! the client's proof. Anything short of an affirmative receipt (an
//! error, a refusal, no answer within the timeout) rejects the purchase.
//!
//! Two verifiers ship with the ledger:
//!
//! - [`RejectingPaymentVerifier`] refuses everything. It is the default,
//!   so a node without a configured provider cannot mint tokens.
//! - [`DemoPaymentVerifier`] accepts the literal proof `"demo"`. It exists
//!   for local development and is insecure by construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DEMO_PAYMENT_PROOF;
use crate::error::{LedgerError, LedgerResult};

/// What the client claims to have paid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub user_id: String,
    pub tokens: u64,
    /// Opaque proof from the payment provider (a charge id, a token, ...).
    pub proof: String,
}

/// Auditable evidence that a payment was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Provider-side reference, stored on the purchase transaction.
    pub reference: String,
    /// Which verifier issued the receipt.
    pub provider: String,
    pub verified_at: DateTime<Utc>,
}

/// External collaborator that affirms payment proofs.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Short identifier used in logs and receipts.
    fn name(&self) -> &'static str;

    /// Returns a receipt if and only if the proof is valid.
    async fn verify(&self, request: &PaymentRequest) -> LedgerResult<PaymentReceipt>;
}

/// Refuses every payment.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingPaymentVerifier;

#[async_trait]
impl PaymentVerifier for RejectingPaymentVerifier {
    fn name(&self) -> &'static str {
        "reject"
    }

    async fn verify(&self, _request: &PaymentRequest) -> LedgerResult<PaymentReceipt> {
        Err(LedgerError::PaymentRejected(
            "no payment provider configured".into(),
        ))
    }
}

/// Accepts the proof `"demo"` and nothing else. Development only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoPaymentVerifier;

#[async_trait]
impl PaymentVerifier for DemoPaymentVerifier {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn verify(&self, request: &PaymentRequest) -> LedgerResult<PaymentReceipt> {
        if request.proof != DEMO_PAYMENT_PROOF {
            return Err(LedgerError::PaymentRejected("invalid payment proof".into()));
        }
        Ok(PaymentReceipt {
            reference: format!("demo-{}", Uuid::new_v4()),
            provider: self.name().to_string(),
            verified_at: Utc::now(),
        })
    }
}
