//! Storage traits: the triple store and the space partitioner.
//!
//! Backends implement [`TripleStore`], [`SpacePartitioner`], and
//! [`CheckpointStore`](crate::checkpoint::CheckpointStore) on one type so
//! the pipeline can commit mutations and the cursor in a single
//! transaction. [`GraphStore`] bundles the three.

use async_trait::async_trait;

use crate::checkpoint::CheckpointStore;
use crate::error::SinkError;
use crate::types::{ColumnDef, Entity, EntityUpsert, ExtensionTable, Literal, Space, Triple};

/// Entity and triple storage.
///
/// Every write is idempotent. Re-applying a fact that is already stored
/// changes nothing and is not an error.
#[async_trait]
pub trait TripleStore: Send + Sync {
    /// Create the entity if absent, then apply the set fields.
    async fn upsert_entity(&self, upsert: &EntityUpsert) -> Result<(), SinkError>;

    /// Insert the edge if absent. Returns `true` if a row was inserted.
    async fn upsert_triple(&self, triple: &Triple) -> Result<bool, SinkError>;

    /// Remove the edge. Returns `true` if a row was removed.
    async fn delete_triple(&self, triple: &Triple) -> Result<bool, SinkError>;

    async fn upsert_literal(&self, literal: &Literal) -> Result<(), SinkError>;

    async fn entity(&self, id: &str) -> Result<Option<Entity>, SinkError>;

    async fn literal(&self, value_id: &str) -> Result<Option<Literal>, SinkError>;

    /// Value ids of `(entity_id, attribute_id, *)`, ordered by value id.
    async fn triples_by_entity_attribute(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<String>, SinkError>;

    /// Entity ids of `(*, attribute_id, value_id)`, ordered by entity id.
    async fn entities_by_attribute_value(
        &self,
        attribute_id: &str,
        value_id: &str,
    ) -> Result<Vec<String>, SinkError>;

    /// Distinct entity ids carrying `attribute_id` with any value, ordered.
    async fn entities_with_attribute(&self, attribute_id: &str) -> Result<Vec<String>, SinkError>;

    /// Entities with `is_type = true`, ordered by id.
    async fn type_entities(&self) -> Result<Vec<Entity>, SinkError>;

    async fn triple_count(&self) -> Result<u64, SinkError>;
}

/// DDL-level provisioning of tenant namespaces and extension tables.
///
/// Both operations are idempotent and tolerate a concurrent provisioner
/// having created the same structure first.
#[async_trait]
pub trait SpacePartitioner: Send + Sync {
    async fn ensure_space(&self, space_id: &str, schema_name: &str) -> Result<(), SinkError>;

    /// Create the table keyed by `id` with a unique `entity_id` foreign key,
    /// then add any of `columns` the table lacks.
    async fn ensure_extension_table(
        &self,
        space_id: &str,
        type_name: &str,
        columns: &[ColumnDef],
    ) -> Result<(), SinkError>;

    async fn spaces(&self) -> Result<Vec<Space>, SinkError>;

    async fn extension_tables(&self) -> Result<Vec<ExtensionTable>, SinkError>;

    /// Row ids of a provisioned extension table, ordered.
    async fn extension_rows(
        &self,
        space_id: &str,
        type_name: &str,
    ) -> Result<Vec<String>, SinkError>;
}

/// A backend the ingestion pipeline can drive end to end.
pub trait GraphStore: TripleStore + SpacePartitioner + CheckpointStore {}

impl<T: TripleStore + SpacePartitioner + CheckpointStore> GraphStore for T {}
