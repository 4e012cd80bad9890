//! Schema registry: the declared shape of every space and extension table.
//!
//! The planner asks for structure in terms of [`SchemaChange`]s. The
//! registry remembers what has already been provisioned and hands back only
//! the delta, so steady-state batches issue no DDL at all.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SinkError;
use crate::store::SpacePartitioner;
use crate::types::{ColumnDef, SchemaChange};

#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    /// space id → schema name
    spaces: BTreeMap<String, String>,
    /// (space id, type name) → declared columns
    tables: BTreeMap<(String, String), BTreeSet<ColumnDef>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from what the store has already provisioned.
    pub async fn load(partitioner: &dyn SpacePartitioner) -> Result<Self, SinkError> {
        let mut registry = Self::new();
        for space in partitioner.spaces().await? {
            registry.spaces.insert(space.id, space.schema_name);
        }
        for table in partitioner.extension_tables().await? {
            registry
                .tables
                .insert((table.space_id, table.type_name), table.columns.into_iter().collect());
        }
        Ok(registry)
    }

    /// Record `change` and return the part of it not yet provisioned.
    pub fn declare(&mut self, change: SchemaChange) -> Option<SchemaChange> {
        match change {
            SchemaChange::EnsureSpace {
                space_id,
                schema_name,
            } => {
                if self.spaces.contains_key(&space_id) {
                    return None;
                }
                self.spaces.insert(space_id.clone(), schema_name.clone());
                Some(SchemaChange::EnsureSpace {
                    space_id,
                    schema_name,
                })
            }
            SchemaChange::EnsureTable {
                space_id,
                schema_name,
                type_name,
                columns,
            } => {
                let key = (space_id.clone(), type_name.clone());
                let (is_new, missing) = match self.tables.get(&key) {
                    Some(known) => (false, columns.difference(known).cloned().collect()),
                    None => (true, columns),
                };
                if !is_new && missing.is_empty() {
                    return None;
                }
                self.tables
                    .entry(key)
                    .or_default()
                    .extend(missing.iter().cloned());
                Some(SchemaChange::EnsureTable {
                    space_id,
                    schema_name,
                    type_name,
                    columns: missing,
                })
            }
        }
    }

    /// Forget a declaration whose DDL failed, so it is retried next time.
    pub fn forget(&mut self, change: &SchemaChange) {
        match change {
            SchemaChange::EnsureSpace { space_id, .. } => {
                self.spaces.remove(space_id);
            }
            SchemaChange::EnsureTable {
                space_id,
                type_name,
                columns,
                ..
            } => {
                let key = (space_id.clone(), type_name.clone());
                if let Some(known) = self.tables.get_mut(&key) {
                    for column in columns {
                        known.remove(column);
                    }
                    if known.is_empty() && columns.is_empty() {
                        self.tables.remove(&key);
                    }
                }
            }
        }
    }

    pub fn has_table(&self, space_id: &str, type_name: &str) -> bool {
        self.tables
            .contains_key(&(space_id.to_string(), type_name.to_string()))
    }

    pub fn columns(&self, space_id: &str, type_name: &str) -> Option<&BTreeSet<ColumnDef>> {
        self.tables.get(&(space_id.to_string(), type_name.to_string()))
    }

    pub fn schema_name(&self, space_id: &str) -> Option<&str> {
        self.spaces.get(space_id).map(String::as_str)
    }
}

/// Issue `change` against the partitioner.
pub async fn provision(
    partitioner: &dyn SpacePartitioner,
    change: &SchemaChange,
) -> Result<(), SinkError> {
    match change {
        SchemaChange::EnsureSpace {
            space_id,
            schema_name,
        } => partitioner.ensure_space(space_id, schema_name).await,
        SchemaChange::EnsureTable {
            space_id,
            type_name,
            columns,
            ..
        } => {
            let columns: Vec<ColumnDef> = columns.iter().cloned().collect();
            partitioner
                .ensure_extension_table(space_id, type_name, &columns)
                .await
        }
    }
}
