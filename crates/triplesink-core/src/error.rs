//! Error types for the triplesink pipeline.

use thiserror::Error;

use crate::cursor::Cursor;

/// Errors that can occur while ingesting the change stream.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream fetch failure (timeout, dropped connection). Retried.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Database unavailable (connection lost, pool exhausted, lock timeout). Retried.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A statement the database rejected. Retrying will not help.
    #[error("Query error: {0}")]
    Query(String),

    #[error("Decode error at block {position}: {reason}")]
    Decode { position: u64, reason: String },

    #[error("Cursor conflict: expected {expected}, found {actual}")]
    CursorConflict { expected: Cursor, actual: Cursor },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SinkError> },

    #[error("Invalid identifier '{ident}': {reason}")]
    InvalidIdentifier { ident: String, reason: String },

    #[error("Sink aborted: {reason}")]
    Aborted { reason: String },
}

impl SinkError {
    /// Returns `true` for I/O-level failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Storage(_))
    }

    /// Returns `true` if the error must terminate the run.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}
