//! triplesink-storage: `sqlx` backends for TripleSink.
//!
//! Backends:
//! - [`sqlite`]: SQLite (embedded, single file or in-memory). Default feature.
//! - `postgres`: PostgreSQL with one schema per space. Feature `postgres`.
//!
//! Both implement every storage trait of `triplesink-core` on one type, so
//! a commit's mutations, undo journal entries, and cursor share a single
//! transaction.

mod error;
mod journal;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::StorageError;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStore};

/// Which backend a connection URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, triplesink_core::SinkError> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(triplesink_core::SinkError::Config(format!(
                "unsupported DATABASE_URL scheme: {url}"
            )))
        }
    }
}
