//! Mapping `sqlx` failures onto the sink's error taxonomy.

use thiserror::Error;
use triplesink_core::SinkError;

/// Storage-level failure before it is classified.
#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("journal entry is corrupt: {0}")]
    Journal(#[from] serde_json::Error),
}

impl From<StorageError> for SinkError {
    fn from(err: StorageError) -> Self {
        match err {
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            StorageError::Sqlx(e) => classify(e),
            StorageError::Journal(e) => SinkError::Query(format!("journal entry is corrupt: {e}")),
        }
    }
}

/// SQLSTATE classes and codes worth retrying.
const TRANSIENT_SQLSTATE: &[&str] = &["40001", "40P01", "55P03", "57P01", "57P02", "57P03"];

/// "Already exists" races during provisioning.
const EXISTS_SQLSTATE: &[&str] = &["42P06", "42P07", "42701", "23505"];

/// SQLite primary result codes for a locked database.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

fn sqlite_primary_code(code: &str) -> Option<i64> {
    // SQLite codes are small integers; SQLSTATEs are five characters.
    if code.len() >= 5 {
        return None;
    }
    code.parse::<i64>().ok().map(|c| c & 0xff)
}

/// Transient I/O and locking failures become [`SinkError::Storage`], the
/// rest [`SinkError::Query`].
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn classify(err: sqlx::Error) -> SinkError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            code.starts_with("08")
                || TRANSIENT_SQLSTATE.contains(&code.as_ref())
                || matches!(sqlite_primary_code(&code), Some(SQLITE_BUSY | SQLITE_LOCKED))
        }),
        _ => false,
    };
    if transient {
        SinkError::Storage(err.to_string())
    } else {
        SinkError::Query(err.to_string())
    }
}

/// Returns `true` if `err` reports that the structure being created exists.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn already_exists(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code()
                .is_some_and(|code| EXISTS_SQLSTATE.contains(&code.as_ref()))
                || db.message().contains("already exists")
                || db.message().contains("duplicate column name")
        }
        _ => false,
    }
}
