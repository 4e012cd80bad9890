//! Undo journal entry encoding.

use triplesink_core::types::JournalOp;

use crate::error::StorageError;

pub(crate) fn encode(op: &JournalOp) -> Result<String, StorageError> {
    Ok(serde_json::to_string(op)?)
}

pub(crate) fn decode(raw: &str) -> Result<JournalOp, StorageError> {
    Ok(serde_json::from_str(raw)?)
}

/// Seconds since the epoch, for `updated_at` columns.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
