//! Input checks shared by every entry point.
//!
//! Identifiers arrive from the app and from machine controllers, so they
//! are checked once at the service boundary before they reach a key.

use crate::config::MAX_ID_LENGTH;
use crate::error::{LedgerError, LedgerResult};

/// Checks an externally supplied identifier.
///
/// Ids must be non-empty, at most [`MAX_ID_LENGTH`] bytes, and free of NUL
/// (the separator in index keys).
pub fn validate_id(field: &str, value: &str) -> LedgerResult<()> {
    if value.is_empty() {
        return Err(LedgerError::Validation(format!("missing {field}")));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(LedgerError::Validation(format!(
            "{field} longer than {MAX_ID_LENGTH} bytes"
        )));
    }
    if value.contains('\0') {
        return Err(LedgerError::Validation(format!(
            "{field} contains a NUL byte"
        )));
    }
    Ok(())
}

/// Checks that a token amount is a positive integer.
pub fn validate_amount(field: &str, value: u64) -> LedgerResult<()> {
    if value == 0 {
        return Err(LedgerError::Validation(format!(
            "{field} must be a positive integer"
        )));
    }
    Ok(())
}

/// Converts a positive token amount to the signed delta stored on a
/// transaction.
pub fn to_delta(field: &str, value: u64) -> LedgerResult<i64> {
    validate_amount(field, value)?;
    i64::try_from(value)
        .map_err(|_| LedgerError::Validation(format!("{field} is too large")))
}
