//! Shared data types: graph rows, mutations, journal entries, and schema shapes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

// ─── Graph rows ──────────────────────────────────────────────────────────────

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// `true` when the entity itself represents a type.
    pub is_type: bool,
    /// For attributes: the entity naming the kind of value they hold.
    pub value_type: Option<String>,
    /// Space the entity was first seen in.
    pub defined_in: Option<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            is_type: false,
            value_type: None,
            defined_in: None,
        }
    }

    /// Returns the entity after `upsert` is applied. `None` fields keep the
    /// current value. `defined_in` is only ever set once.
    pub fn merged(&self, upsert: &EntityUpsert) -> Entity {
        Entity {
            id: self.id.clone(),
            name: upsert.name.clone().or_else(|| self.name.clone()),
            description: upsert
                .description
                .clone()
                .or_else(|| self.description.clone()),
            is_type: upsert.is_type.unwrap_or(self.is_type),
            value_type: upsert.value_type.clone().or_else(|| self.value_type.clone()),
            defined_in: self.defined_in.clone().or_else(|| upsert.defined_in.clone()),
        }
    }
}

/// Create-or-update request for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpsert {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_type: Option<bool>,
    pub value_type: Option<String>,
    pub defined_in: Option<String>,
}

impl EntityUpsert {
    /// Reference an entity without changing any of its attributes.
    pub fn touch(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            is_type: None,
            value_type: None,
            defined_in: None,
        }
    }

    /// Record `space_id` as the entity's home space if it has none yet.
    pub fn in_space(mut self, space_id: impl Into<String>) -> Self {
        self.defined_in = Some(space_id.into());
        self
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::touch(id)
        }
    }

    pub fn as_type(id: impl Into<String>) -> Self {
        Self {
            is_type: Some(true),
            ..Self::touch(id)
        }
    }

    /// The entity this upsert produces when no row exists yet.
    pub fn to_entity(&self) -> Entity {
        Entity::new(self.id.clone()).merged(self)
    }
}

/// A directed labeled edge `(entity, attribute, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub entity_id: String,
    pub attribute_id: String,
    pub value_id: String,
}

impl Triple {
    pub fn new(
        entity_id: impl Into<String>,
        attribute_id: impl Into<String>,
        value_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute_id: attribute_id.into(),
            value_id: value_id.into(),
        }
    }
}

/// Kind of value a triple points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    String,
    Image,
    Entity,
    Date,
    Url,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Image => "image",
            Self::Entity => "entity",
            Self::Date => "date",
            Self::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "image" => Some(Self::Image),
            "entity" => Some(Self::Entity),
            "date" => Some(Self::Date),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// Literal content of a non-entity value, keyed by the value id the triple
/// references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    pub value_id: String,
    pub value_type: ValueType,
    pub value: String,
}

/// A row in a per-space extension table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRow {
    pub space_id: String,
    pub schema_name: String,
    pub type_name: String,
    pub row_id: String,
    pub entity_id: String,
}

// ─── Mutations ───────────────────────────────────────────────────────────────

/// A single row-level change produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    UpsertEntity(EntityUpsert),
    UpsertLiteral(Literal),
    UpsertTriple(Triple),
    DeleteTriple(Triple),
    InsertExtensionRow(ExtensionRow),
}

/// The mutations of one stream position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSegment {
    pub block_number: u64,
    pub mutations: Vec<Mutation>,
}

/// Everything committed in one transaction: one or more coalesced stream
/// positions plus the cursor of the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub position: Cursor,
    pub segments: Vec<BatchSegment>,
}

impl CommitBatch {
    /// A batch covering exactly one position.
    pub fn single(position: Cursor, mutations: Vec<Mutation>) -> Self {
        let block_number = position.block_number;
        Self {
            position,
            segments: vec![BatchSegment {
                block_number,
                mutations,
            }],
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.segments.iter().map(|s| s.mutations.len()).sum()
    }
}

// ─── Undo journal ────────────────────────────────────────────────────────────

/// A recorded state change, kept so orphaned positions can be reverted.
///
/// Only effective changes are journaled: an upsert that found identical data
/// leaves no entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    EntityWritten {
        id: String,
        previous: Option<Entity>,
    },
    LiteralWritten {
        value_id: String,
        previous: Option<Literal>,
    },
    TripleInserted {
        triple: Triple,
    },
    TripleDeleted {
        triple: Triple,
    },
    RowInserted {
        row: ExtensionRow,
    },
}

/// Outcome of rewinding the store to an earlier cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub from: Cursor,
    pub to: Cursor,
    /// Journal entries reverted.
    pub ops_reverted: usize,
    /// Triples removed because they were introduced on the orphaned branch.
    pub triples_retracted: usize,
    /// Triples restored because the orphaned branch had deleted them.
    pub triples_restored: usize,
}

// ─── Spaces and extension tables ─────────────────────────────────────────────

/// A tenant partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: String,
    pub schema_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    /// Entity id of the related entity.
    Relation,
}

impl ColumnType {
    /// Physical column type.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Text | Self::Relation => "TEXT",
            Self::Integer => "BIGINT",
            Self::Real => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Name recorded in the column catalog. Unlike [`sql`](Self::sql) it
    /// tells relation columns apart from text.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relation => "RELATION",
            other => other.sql(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "RELATION" => Some(Self::Relation),
            "BIGINT" | "INTEGER" => Some(Self::Integer),
            "DOUBLE PRECISION" | "REAL" => Some(Self::Real),
            "BOOLEAN" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// A tenant-declared column on an extension table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Column holding values of attribute `attribute_id`: a relation column
    /// when the attribute's values are entities, text otherwise.
    pub fn for_attribute(attribute_id: &str, relation: bool) -> Self {
        let column_type = if relation {
            ColumnType::Relation
        } else {
            ColumnType::Text
        };
        Self::new(format!("attr_{attribute_id}"), column_type)
    }
}

/// A provisioned extension table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionTable {
    pub space_id: String,
    pub type_name: String,
    pub columns: Vec<ColumnDef>,
}

/// A structural change requested by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    EnsureSpace {
        space_id: String,
        schema_name: String,
    },
    EnsureTable {
        space_id: String,
        schema_name: String,
        type_name: String,
        columns: BTreeSet<ColumnDef>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_keeps_unset_fields() {
        let existing = Entity {
            name: Some("Goal A".into()),
            is_type: true,
            ..Entity::new("1")
        };
        let merged = existing.merged(&EntityUpsert::touch("1"));
        assert_eq!(merged, existing);

        let renamed = existing.merged(&EntityUpsert::named("1", "Goal B"));
        assert_eq!(renamed.name.as_deref(), Some("Goal B"));
        assert!(renamed.is_type);
    }

    #[test]
    fn first_space_wins_and_descriptions_update() {
        let entity = EntityUpsert::touch("1").in_space("0xA").to_entity();
        assert_eq!(entity.defined_in.as_deref(), Some("0xA"));

        let upsert = EntityUpsert {
            description: Some("A goal".into()),
            value_type: Some("relation".into()),
            ..EntityUpsert::touch("1").in_space("0xB")
        };
        let merged = entity.merged(&upsert);
        assert_eq!(merged.defined_in.as_deref(), Some("0xA"));
        assert_eq!(merged.description.as_deref(), Some("A goal"));
        assert_eq!(merged.value_type.as_deref(), Some("relation"));
    }

    #[test]
    fn new_entity_defaults_to_not_a_type() {
        let entity = EntityUpsert::named("2", "Subgoal B").to_entity();
        assert!(!entity.is_type);
        assert!(EntityUpsert::as_type("t").to_entity().is_type);
    }

    #[test]
    fn journal_op_serializes_with_tag() {
        let op = JournalOp::TripleInserted {
            triple: Triple::new("e", "a", "v"),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""op":"triple_inserted""#));
        let back: JournalOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn attribute_column_name() {
        let col = ColumnDef::for_attribute("abc123", false);
        assert_eq!(col.name, "attr_abc123");
        assert_eq!(col.column_type.sql(), "TEXT");
    }

    #[test]
    fn relation_columns_are_text_but_cataloged_apart() {
        let col = ColumnDef::for_attribute("parent", true);
        assert_eq!(col.column_type, ColumnType::Relation);
        assert_eq!(col.column_type.sql(), "TEXT");
        assert_eq!(ColumnType::parse(col.column_type.name()), Some(ColumnType::Relation));
    }
}
