//! Checkpoint store: the cursor and the mutations it covers, committed together.
//!
//! The cursor row is only ever written in the same transaction as the
//! mutations of the batch it points at. On restart the pipeline resumes
//! strictly after the stored cursor, so a crash between fetch and commit
//! replays the batch and a crash after commit skips it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::types::{CommitBatch, RollbackReport};

/// Persistence for the single deployment cursor.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored cursor, or [`Cursor::start`] when nothing was committed.
    async fn get_cursor(&self) -> Result<Cursor, SinkError>;

    /// Apply `batch` and move the cursor to `batch.position` atomically.
    ///
    /// Fails with [`SinkError::CursorConflict`] without writing anything if
    /// the stored cursor is not `expected`.
    async fn advance(&self, expected: &Cursor, batch: &CommitBatch) -> Result<(), SinkError>;

    /// Revert every journaled change above `target.block_number`, newest
    /// first, and set the cursor to `target`, atomically.
    async fn rewind(&self, expected: &Cursor, target: &Cursor)
        -> Result<RollbackReport, SinkError>;

    /// Drop undo journal entries at or below `block_number`. Rewinding below
    /// the pruned height fails afterwards.
    async fn prune_journal(&self, block_number: u64) -> Result<u64, SinkError>;
}

/// Exclusive lower bound of the journal blocks a rewind to `target`
/// reverts. Rewinding to the start reverts everything, block 0 included.
pub fn revert_above(target: &Cursor) -> i64 {
    if target.is_start() {
        -1
    } else {
        target.block_number as i64
    }
}

/// Fails with [`SinkError::Aborted`] if pruning dropped journal entries a
/// rewind to `target` would need. `intact_from` is the lowest block whose
/// journal entries are all still present.
pub fn check_journal_retained(target: &Cursor, intact_from: u64) -> Result<(), SinkError> {
    let needed_from = if target.is_start() {
        0
    } else {
        target.block_number.saturating_add(1)
    };
    if needed_from < intact_from {
        return Err(SinkError::Aborted {
            reason: format!(
                "cannot rewind to {target}: undo journal pruned below block {intact_from}"
            ),
        });
    }
    Ok(())
}

/// Compare-and-set wrapper around a [`CheckpointStore`].
///
/// Remembers the cursor it last observed so a second writer moving the
/// cursor underneath is detected instead of overwritten.
pub struct Checkpoint {
    store: Arc<dyn CheckpointStore>,
    expected: Cursor,
}

impl Checkpoint {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            expected: Cursor::start(),
        }
    }

    /// Read the stored cursor and adopt it as the expected value.
    pub async fn load(&mut self) -> Result<Cursor, SinkError> {
        self.expected = self.store.get_cursor().await?;
        Ok(self.expected.clone())
    }

    /// The last cursor known to be durable.
    pub fn cursor(&self) -> &Cursor {
        &self.expected
    }

    /// Commit `batch` and advance the cursor.
    ///
    /// A retried commit whose first attempt landed but whose acknowledgement
    /// was lost shows up as a conflict with the stored cursor already at
    /// `batch.position`; that counts as success.
    pub async fn commit(&mut self, batch: &CommitBatch) -> Result<(), SinkError> {
        match self.store.advance(&self.expected, batch).await {
            Ok(()) => {}
            Err(SinkError::CursorConflict { actual, .. }) if actual == batch.position => {
                warn!(position = %batch.position, "commit already applied, adopting stored cursor");
            }
            Err(e) => return Err(e),
        }
        debug!(
            block = batch.position.block_number,
            mutations = batch.mutation_count(),
            "checkpoint advanced"
        );
        self.expected = batch.position.clone();
        Ok(())
    }

    /// Roll the store back to `target`.
    pub async fn rewind(&mut self, target: &Cursor) -> Result<RollbackReport, SinkError> {
        let report = match self.store.rewind(&self.expected, target).await {
            Ok(report) => report,
            Err(SinkError::CursorConflict { actual, .. }) if actual == *target => {
                warn!(to = %target, "rewind already applied, adopting stored cursor");
                RollbackReport {
                    from: self.expected.clone(),
                    to: target.clone(),
                    ..Default::default()
                }
            }
            Err(e) => return Err(e),
        };
        self.expected = target.clone();
        Ok(report)
    }

    pub async fn prune(&self, keep_after: u64) -> Result<u64, SinkError> {
        self.store.prune_journal(keep_after).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::TripleStore;
    use crate::types::{EntityUpsert, Mutation, Triple};

    fn batch(block: u64, triples: &[(&str, &str, &str)]) -> CommitBatch {
        let mut mutations = Vec::new();
        for (e, a, v) in triples {
            mutations.push(Mutation::UpsertEntity(EntityUpsert::touch(*e)));
            mutations.push(Mutation::UpsertTriple(Triple::new(*e, *a, *v)));
        }
        CommitBatch::single(Cursor::new(block.to_string(), block), mutations)
    }

    #[test]
    fn rewind_to_start_reverts_block_zero() {
        assert_eq!(revert_above(&Cursor::start()), -1);
        assert_eq!(revert_above(&Cursor::new("c0", 0)), 0);
        assert_eq!(revert_above(&Cursor::new("c9", 9)), 9);
    }

    #[test]
    fn pruned_journal_blocks_deep_rewinds() {
        // Nothing pruned.
        assert!(check_journal_retained(&Cursor::start(), 0).is_ok());
        // Block 0 pruned: the start is out of reach, block 0 is not.
        assert!(check_journal_retained(&Cursor::start(), 1).is_err());
        assert!(check_journal_retained(&Cursor::new("c0", 0), 1).is_ok());
        // Pruned up to block 10.
        assert!(check_journal_retained(&Cursor::new("c10", 10), 11).is_ok());
        assert!(matches!(
            check_journal_retained(&Cursor::new("c5", 5), 11),
            Err(SinkError::Aborted { .. })
        ));
    }

    #[tokio::test]
    async fn starts_at_start_of_stream() {
        let store = Arc::new(MemoryStore::new());
        let mut checkpoint = Checkpoint::new(store);
        assert!(checkpoint.load().await.unwrap().is_start());
    }

    #[tokio::test]
    async fn commit_advances_cursor_with_mutations() {
        let store = Arc::new(MemoryStore::new());
        let mut checkpoint = Checkpoint::new(store.clone());
        checkpoint.load().await.unwrap();

        checkpoint
            .commit(&batch(100, &[("1", "a", "x"), ("1", "a", "y"), ("2", "a", "x")]))
            .await
            .unwrap();

        assert_eq!(store.get_cursor().await.unwrap(), Cursor::new("100", 100));
        assert_eq!(store.triple_count().await.unwrap(), 3);
        assert_eq!(checkpoint.cursor().block_number, 100);
    }

    #[tokio::test]
    async fn concurrent_writer_is_detected() {
        let store = Arc::new(MemoryStore::new());
        let mut first = Checkpoint::new(store.clone());
        let mut second = Checkpoint::new(store.clone());
        first.load().await.unwrap();
        second.load().await.unwrap();

        first.commit(&batch(1, &[("1", "a", "x")])).await.unwrap();
        let err = second.commit(&batch(2, &[("2", "a", "x")])).await.unwrap_err();
        assert!(matches!(err, SinkError::CursorConflict { .. }));
        // The losing batch left nothing behind.
        assert_eq!(store.triple_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lost_acknowledgement_is_success() {
        let store = Arc::new(MemoryStore::new());
        let b = batch(5, &[("1", "a", "x")]);
        // First attempt landed directly on the store.
        store.advance(&Cursor::start(), &b).await.unwrap();

        let mut checkpoint = Checkpoint::new(store.clone());
        checkpoint.commit(&b).await.unwrap();
        assert_eq!(checkpoint.cursor(), &b.position);
        assert_eq!(store.triple_count().await.unwrap(), 1);
    }
}
