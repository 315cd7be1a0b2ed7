//! Run identifier generation.

use crate::error::{Error, Result};
use uuid::Uuid;

/// Generate a new run identifier: 32 lowercase hex characters
/// (a UUIDv4 without dashes).
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Validate a run identifier supplied by a client.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Ok(());
    }
    Err(Error::InvalidRunId(id.to_string()))
}
