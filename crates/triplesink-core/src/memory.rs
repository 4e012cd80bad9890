//! In-memory graph store for tests and ephemeral runs.
//!
//! A commit applies the batch to a copy of the state and swaps it in, so a
//! failing mutation leaves the previous state untouched.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::checkpoint::{check_journal_retained, CheckpointStore};
use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::store::{SpacePartitioner, TripleStore};
use crate::types::{
    ColumnDef, CommitBatch, Entity, EntityUpsert, ExtensionRow, ExtensionTable, JournalOp,
    Literal, Mutation, RollbackReport, Space, Triple,
};

#[derive(Debug, Clone, Default)]
struct Table {
    columns: BTreeSet<ColumnDef>,
    /// row id → entity id
    rows: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    cursor: Cursor,
    entities: BTreeMap<String, Entity>,
    triples: BTreeSet<Triple>,
    literals: BTreeMap<String, Literal>,
    spaces: BTreeMap<String, Space>,
    tables: BTreeMap<(String, String), Table>,
    journal: Vec<(u64, JournalOp)>,
    /// Lowest block whose journal entries are all retained.
    journal_floor: u64,
}

impl GraphState {
    fn apply(&mut self, mutation: &Mutation) -> Result<Option<JournalOp>, SinkError> {
        let op = match mutation {
            Mutation::UpsertEntity(upsert) => {
                let previous = self.entities.get(&upsert.id).cloned();
                let next = match &previous {
                    Some(entity) => entity.merged(upsert),
                    None => upsert.to_entity(),
                };
                if previous.as_ref() == Some(&next) {
                    return Ok(None);
                }
                self.entities.insert(next.id.clone(), next);
                JournalOp::EntityWritten {
                    id: upsert.id.clone(),
                    previous,
                }
            }
            Mutation::UpsertLiteral(literal) => {
                let previous = self.literals.get(&literal.value_id).cloned();
                if previous.as_ref() == Some(literal) {
                    return Ok(None);
                }
                self.literals.insert(literal.value_id.clone(), literal.clone());
                JournalOp::LiteralWritten {
                    value_id: literal.value_id.clone(),
                    previous,
                }
            }
            Mutation::UpsertTriple(triple) => {
                if !self.triples.insert(triple.clone()) {
                    return Ok(None);
                }
                JournalOp::TripleInserted {
                    triple: triple.clone(),
                }
            }
            Mutation::DeleteTriple(triple) => {
                if !self.triples.remove(triple) {
                    return Ok(None);
                }
                JournalOp::TripleDeleted {
                    triple: triple.clone(),
                }
            }
            Mutation::InsertExtensionRow(row) => {
                if !self.entities.contains_key(&row.entity_id) {
                    return Err(SinkError::Query(format!(
                        "extension row '{}' references unknown entity '{}'",
                        row.row_id, row.entity_id
                    )));
                }
                let table = self
                    .tables
                    .get_mut(&(row.space_id.clone(), row.type_name.clone()))
                    .ok_or_else(|| {
                        SinkError::Query(format!(
                            "extension table {}.{} does not exist",
                            row.schema_name, row.type_name
                        ))
                    })?;
                if table.rows.contains_key(&row.row_id) {
                    return Ok(None);
                }
                table.rows.insert(row.row_id.clone(), row.entity_id.clone());
                JournalOp::RowInserted { row: row.clone() }
            }
        };
        Ok(Some(op))
    }

    fn revert(&mut self, op: &JournalOp, report: &mut RollbackReport) {
        match op {
            JournalOp::EntityWritten { id, previous } => match previous {
                Some(entity) => {
                    self.entities.insert(id.clone(), entity.clone());
                }
                None => {
                    self.entities.remove(id);
                }
            },
            JournalOp::LiteralWritten { value_id, previous } => match previous {
                Some(literal) => {
                    self.literals.insert(value_id.clone(), literal.clone());
                }
                None => {
                    self.literals.remove(value_id);
                }
            },
            JournalOp::TripleInserted { triple } => {
                self.triples.remove(triple);
                report.triples_retracted += 1;
            }
            JournalOp::TripleDeleted { triple } => {
                self.triples.insert(triple.clone());
                report.triples_restored += 1;
            }
            JournalOp::RowInserted { row } => {
                if let Some(table) = self
                    .tables
                    .get_mut(&(row.space_id.clone(), row.type_name.clone()))
                {
                    table.rows.remove(&row.row_id);
                }
            }
        }
        report.ops_reverted += 1;
    }
}

/// In-memory implementation of every storage trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<GraphState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal entries currently retained.
    pub async fn journal_len(&self) -> usize {
        self.state.read().await.journal.len()
    }
}

// ─── TripleStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl TripleStore for MemoryStore {
    async fn upsert_entity(&self, upsert: &EntityUpsert) -> Result<(), SinkError> {
        self.state
            .write()
            .await
            .apply(&Mutation::UpsertEntity(upsert.clone()))?;
        Ok(())
    }

    async fn upsert_triple(&self, triple: &Triple) -> Result<bool, SinkError> {
        let op = self
            .state
            .write()
            .await
            .apply(&Mutation::UpsertTriple(triple.clone()))?;
        Ok(op.is_some())
    }

    async fn delete_triple(&self, triple: &Triple) -> Result<bool, SinkError> {
        let op = self
            .state
            .write()
            .await
            .apply(&Mutation::DeleteTriple(triple.clone()))?;
        Ok(op.is_some())
    }

    async fn upsert_literal(&self, literal: &Literal) -> Result<(), SinkError> {
        self.state
            .write()
            .await
            .apply(&Mutation::UpsertLiteral(literal.clone()))?;
        Ok(())
    }

    async fn entity(&self, id: &str) -> Result<Option<Entity>, SinkError> {
        Ok(self.state.read().await.entities.get(id).cloned())
    }

    async fn literal(&self, value_id: &str) -> Result<Option<Literal>, SinkError> {
        Ok(self.state.read().await.literals.get(value_id).cloned())
    }

    async fn triples_by_entity_attribute(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        Ok(self
            .state
            .read()
            .await
            .triples
            .iter()
            .filter(|t| t.entity_id == entity_id && t.attribute_id == attribute_id)
            .map(|t| t.value_id.clone())
            .collect())
    }

    async fn entities_by_attribute_value(
        &self,
        attribute_id: &str,
        value_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        Ok(self
            .state
            .read()
            .await
            .triples
            .iter()
            .filter(|t| t.attribute_id == attribute_id && t.value_id == value_id)
            .map(|t| t.entity_id.clone())
            .collect())
    }

    async fn entities_with_attribute(&self, attribute_id: &str) -> Result<Vec<String>, SinkError> {
        let ids: BTreeSet<String> = self
            .state
            .read()
            .await
            .triples
            .iter()
            .filter(|t| t.attribute_id == attribute_id)
            .map(|t| t.entity_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn type_entities(&self) -> Result<Vec<Entity>, SinkError> {
        Ok(self
            .state
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.is_type)
            .cloned()
            .collect())
    }

    async fn triple_count(&self) -> Result<u64, SinkError> {
        Ok(self.state.read().await.triples.len() as u64)
    }
}

// ─── SpacePartitioner impl ───────────────────────────────────────────────────

#[async_trait]
impl SpacePartitioner for MemoryStore {
    async fn ensure_space(&self, space_id: &str, schema_name: &str) -> Result<(), SinkError> {
        self.state
            .write()
            .await
            .spaces
            .entry(space_id.to_string())
            .or_insert_with(|| Space {
                id: space_id.to_string(),
                schema_name: schema_name.to_string(),
            });
        Ok(())
    }

    async fn ensure_extension_table(
        &self,
        space_id: &str,
        type_name: &str,
        columns: &[ColumnDef],
    ) -> Result<(), SinkError> {
        let mut state = self.state.write().await;
        if !state.spaces.contains_key(space_id) {
            return Err(SinkError::Query(format!("space '{space_id}' is not provisioned")));
        }
        let table = state
            .tables
            .entry((space_id.to_string(), type_name.to_string()))
            .or_default();
        table.columns.extend(columns.iter().cloned());
        Ok(())
    }

    async fn spaces(&self) -> Result<Vec<Space>, SinkError> {
        Ok(self.state.read().await.spaces.values().cloned().collect())
    }

    async fn extension_tables(&self) -> Result<Vec<ExtensionTable>, SinkError> {
        Ok(self
            .state
            .read()
            .await
            .tables
            .iter()
            .map(|((space_id, type_name), table)| ExtensionTable {
                space_id: space_id.clone(),
                type_name: type_name.clone(),
                columns: table.columns.iter().cloned().collect(),
            })
            .collect())
    }

    async fn extension_rows(
        &self,
        space_id: &str,
        type_name: &str,
    ) -> Result<Vec<String>, SinkError> {
        Ok(self
            .state
            .read()
            .await
            .tables
            .get(&(space_id.to_string(), type_name.to_string()))
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_cursor(&self) -> Result<Cursor, SinkError> {
        Ok(self.state.read().await.cursor.clone())
    }

    async fn advance(&self, expected: &Cursor, batch: &CommitBatch) -> Result<(), SinkError> {
        let mut state = self.state.write().await;
        if state.cursor != *expected {
            return Err(SinkError::CursorConflict {
                expected: expected.clone(),
                actual: state.cursor.clone(),
            });
        }

        let mut next = state.clone();
        for segment in &batch.segments {
            for mutation in &segment.mutations {
                if let Some(op) = next.apply(mutation)? {
                    next.journal.push((segment.block_number, op));
                }
            }
        }
        next.cursor = batch.position.clone();
        *state = next;
        Ok(())
    }

    async fn rewind(
        &self,
        expected: &Cursor,
        target: &Cursor,
    ) -> Result<RollbackReport, SinkError> {
        let mut state = self.state.write().await;
        if state.cursor != *expected {
            return Err(SinkError::CursorConflict {
                expected: expected.clone(),
                actual: state.cursor.clone(),
            });
        }
        check_journal_retained(target, state.journal_floor)?;

        let mut report = RollbackReport {
            from: state.cursor.clone(),
            to: target.clone(),
            ..Default::default()
        };
        while let Some((block, _)) = state.journal.last() {
            if target.covers(*block) {
                break;
            }
            if let Some((_, op)) = state.journal.pop() {
                state.revert(&op, &mut report);
            }
        }
        state.cursor = target.clone();
        Ok(report)
    }

    async fn prune_journal(&self, block_number: u64) -> Result<u64, SinkError> {
        let mut state = self.state.write().await;
        let before = state.journal.len();
        state.journal.retain(|(block, _)| *block > block_number);
        state.journal_floor = state.journal_floor.max(block_number.saturating_add(1));
        Ok((before - state.journal.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(block: u64) -> Cursor {
        Cursor::new(format!("cur-{block}"), block)
    }

    #[tokio::test]
    async fn triple_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let t = Triple::new("2", "parent", "1");
        assert!(store.upsert_triple(&t).await.unwrap());
        assert!(!store.upsert_triple(&t).await.unwrap());
        assert_eq!(store.triple_count().await.unwrap(), 1);
        assert!(store.delete_triple(&t).await.unwrap());
        assert!(!store.delete_triple(&t).await.unwrap());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let store = MemoryStore::new();
        let batch = CommitBatch::single(
            pos(1),
            vec![
                Mutation::UpsertTriple(Triple::new("e", "a", "v")),
                // No extension table exists, so this fails.
                Mutation::InsertExtensionRow(ExtensionRow {
                    space_id: "s".into(),
                    schema_name: "s".into(),
                    type_name: "T".into(),
                    row_id: "e".into(),
                    entity_id: "e".into(),
                }),
            ],
        );
        assert!(store.advance(&Cursor::start(), &batch).await.is_err());
        assert_eq!(store.triple_count().await.unwrap(), 0);
        assert!(store.get_cursor().await.unwrap().is_start());
    }

    #[tokio::test]
    async fn rewind_restores_previous_state() {
        let store = MemoryStore::new();
        store
            .advance(
                &Cursor::start(),
                &CommitBatch::single(
                    pos(1),
                    vec![
                        Mutation::UpsertEntity(EntityUpsert::named("1", "Goal A")),
                        Mutation::UpsertTriple(Triple::new("1", "a", "x")),
                    ],
                ),
            )
            .await
            .unwrap();
        store
            .advance(
                &pos(1),
                &CommitBatch::single(
                    pos(2),
                    vec![
                        Mutation::UpsertEntity(EntityUpsert::named("1", "Goal B")),
                        Mutation::UpsertEntity(EntityUpsert::touch("2")),
                        Mutation::UpsertTriple(Triple::new("2", "a", "x")),
                        Mutation::DeleteTriple(Triple::new("1", "a", "x")),
                    ],
                ),
            )
            .await
            .unwrap();

        let report = store.rewind(&pos(2), &pos(1)).await.unwrap();
        assert_eq!(report.triples_retracted, 1);
        assert_eq!(report.triples_restored, 1);
        assert_eq!(store.get_cursor().await.unwrap(), pos(1));
        assert_eq!(
            store.triples_by_entity_attribute("1", "a").await.unwrap(),
            vec!["x".to_string()]
        );
        assert!(store.entity("2").await.unwrap().is_none());
        let goal = store.entity("1").await.unwrap().unwrap();
        assert_eq!(goal.name.as_deref(), Some("Goal A"));
        assert_eq!(store.journal_len().await, 2);
    }

    #[tokio::test]
    async fn rewind_restores_description_and_keeps_home_space() {
        let store = MemoryStore::new();
        let described = |text: &str, space: &str| {
            Mutation::UpsertEntity(EntityUpsert {
                description: Some(text.into()),
                ..EntityUpsert::touch("1").in_space(space)
            })
        };
        store
            .advance(&Cursor::start(), &CommitBatch::single(pos(1), vec![described("first", "0xA")]))
            .await
            .unwrap();
        store
            .advance(&pos(1), &CommitBatch::single(pos(2), vec![described("second", "0xB")]))
            .await
            .unwrap();
        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.description.as_deref(), Some("second"));
        assert_eq!(entity.defined_in.as_deref(), Some("0xA"));

        store.rewind(&pos(2), &pos(1)).await.unwrap();
        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.description.as_deref(), Some("first"));
        assert_eq!(entity.defined_in.as_deref(), Some("0xA"));
    }

    #[tokio::test]
    async fn rewind_below_pruned_journal_fails() {
        let store = MemoryStore::new();
        store
            .advance(
                &Cursor::start(),
                &CommitBatch::single(pos(10), vec![Mutation::UpsertTriple(Triple::new("e", "a", "v"))]),
            )
            .await
            .unwrap();
        assert_eq!(store.prune_journal(10).await.unwrap(), 1);
        let err = store.rewind(&pos(10), &pos(5)).await.unwrap_err();
        assert!(matches!(err, SinkError::Aborted { .. }));
    }

    #[tokio::test]
    async fn rewind_to_start_reverts_block_zero() {
        let store = MemoryStore::new();
        store
            .advance(
                &Cursor::start(),
                &CommitBatch::single(pos(0), vec![Mutation::UpsertTriple(Triple::new("e", "a", "v"))]),
            )
            .await
            .unwrap();

        let report = store.rewind(&pos(0), &Cursor::start()).await.unwrap();
        assert_eq!(report.triples_retracted, 1);
        assert!(store.get_cursor().await.unwrap().is_start());
        assert_eq!(store.triple_count().await.unwrap(), 0);
        assert_eq!(store.journal_len().await, 0);
    }

    #[tokio::test]
    async fn extension_table_columns_accumulate() {
        let store = MemoryStore::new();
        store.ensure_space("0xabc", "0xabc").await.unwrap();
        store.ensure_space("0xabc", "0xabc").await.unwrap();
        let col = ColumnDef::for_attribute("due", false);
        store.ensure_extension_table("0xabc", "Goal", &[]).await.unwrap();
        store
            .ensure_extension_table("0xabc", "Goal", &[col.clone()])
            .await
            .unwrap();
        store
            .ensure_extension_table("0xabc", "Goal", &[col.clone()])
            .await
            .unwrap();

        let tables = store.extension_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns, vec![col]);
        assert_eq!(store.spaces().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn table_requires_space() {
        let store = MemoryStore::new();
        assert!(store.ensure_extension_table("nope", "Goal", &[]).await.is_err());
    }
}
