//! # Ledger Configuration & Constants
//!
//! Every protocol-level number the ledger depends on lives here. Runtime
//! knobs (ports, data directory, the machine secret) belong to the node's
//! CLI; the values below define the contract between the app, the backend
//! and the machine controllers, and changing them changes that contract.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Reservation Lifecycle
// ---------------------------------------------------------------------------

/// Reservation lifetime in whole seconds, as reported to the app in the
/// `expires_in` field of a reservation.
pub const RESERVATION_TTL_SECS: u64 = 60;

/// How long a spend reservation may be claimed before it self-refunds.
///
/// A reservation whose age is strictly greater than this is expired.
/// Exactly 60 seconds old is still claimable.
pub const RESERVATION_TTL: Duration = Duration::from_secs(RESERVATION_TTL_SECS);

// ---------------------------------------------------------------------------
// Wallets & History
// ---------------------------------------------------------------------------

/// Display name given to wallets created on first reference.
pub const DEFAULT_DISPLAY_NAME: &str = "Player";

/// Maximum number of history entries returned per user.
pub const HISTORY_LIMIT: usize = 50;

/// Tokens credited by the debug grant endpoint when no amount is given.
pub const DEFAULT_GRANT_AMOUNT: u64 = 10;

/// Maximum length in bytes of any user, machine or transaction identifier.
pub const MAX_ID_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Machines
// ---------------------------------------------------------------------------

/// Conversion rate used when a claiming machine is not registered.
pub const DEFAULT_TOKENS_PER_CREDIT: u64 = 1;

/// Machine seeded into an empty directory at node startup.
pub const SEED_MACHINE_ID: &str = "M001";

/// Display name of the seeded machine.
pub const SEED_MACHINE_NAME: &str = "Double Dragon";

/// Display name recorded on purchase transactions.
pub const PURCHASE_DISPLAY_NAME: &str = "Token Purchase";

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Upper bound on a single payment-proof verification round trip.
/// Purchases fail closed when the verifier does not answer in time.
pub const PAYMENT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Proof string accepted by the development payment verifier.
pub const DEMO_PAYMENT_PROOF: &str = "demo";
