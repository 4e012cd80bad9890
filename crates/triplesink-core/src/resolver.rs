//! Type resolution and computed relations, read straight off the triples.
//!
//! Nothing here is materialized. Types, schemas, and named relations are
//! answered by walking triples at query time, so new types and attributes
//! need no migration.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::relations::{Direction, RelationRegistry, Role};
use crate::store::TripleStore;
use crate::types::Entity;

/// A named accessor computed from the triple store.
#[async_trait]
pub trait RelationResolver: Send + Sync {
    /// Accessor name exposed to the query layer (e.g. `"opposing_arguments"`).
    fn name(&self) -> &str;

    /// Relation ids this resolver answers for.
    fn relation_ids(&self) -> &[String];

    async fn resolve(
        &self,
        store: &dyn TripleStore,
        entity_id: &str,
    ) -> Result<Vec<String>, SinkError>;
}

/// Follows one relation (and its aliases) in a fixed direction.
pub struct RelationAccessor {
    name: String,
    relation_ids: Vec<String>,
    direction: Direction,
}

impl RelationAccessor {
    pub fn new(name: impl Into<String>, relation_ids: Vec<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            relation_ids,
            direction,
        }
    }
}

#[async_trait]
impl RelationResolver for RelationAccessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn relation_ids(&self) -> &[String] {
        &self.relation_ids
    }

    async fn resolve(
        &self,
        store: &dyn TripleStore,
        entity_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        let mut out = Vec::new();
        for relation in &self.relation_ids {
            let found = match self.direction {
                Direction::Outgoing => store.triples_by_entity_attribute(entity_id, relation).await?,
                Direction::Incoming => store.entities_by_attribute_value(relation, entity_id).await?,
            };
            push_unique(&mut out, found);
        }
        Ok(out)
    }
}

/// `schema_of`: attributes attached to any of the entity's types.
pub struct SchemaResolver {
    type_ids: Vec<String>,
    attribute_of_type_ids: Vec<String>,
}

impl SchemaResolver {
    pub fn new(relations: &RelationRegistry) -> Self {
        Self {
            type_ids: relations.ids(Role::Type).to_vec(),
            attribute_of_type_ids: relations.ids(Role::AttributeOfType).to_vec(),
        }
    }
}

#[async_trait]
impl RelationResolver for SchemaResolver {
    fn name(&self) -> &str {
        "schema"
    }

    fn relation_ids(&self) -> &[String] {
        &self.attribute_of_type_ids
    }

    async fn resolve(
        &self,
        store: &dyn TripleStore,
        entity_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        let mut types = BTreeSet::new();
        for relation in &self.type_ids {
            types.extend(store.triples_by_entity_attribute(entity_id, relation).await?);
        }

        let mut attributes = Vec::new();
        for type_id in &types {
            for relation in &self.attribute_of_type_ids {
                let found = store.entities_by_attribute_value(relation, type_id).await?;
                push_unique(&mut attributes, found);
            }
        }
        Ok(attributes)
    }
}

fn push_unique(out: &mut Vec<String>, found: Vec<String>) {
    for id in found {
        if !out.contains(&id) {
            out.push(id);
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Resolvers keyed by accessor name.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn RelationResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `types`, `schema`, `attributes`, plus every configured computed relation.
    pub fn standard(relations: &RelationRegistry) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RelationAccessor::new(
            "types",
            relations.ids(Role::Type).to_vec(),
            Direction::Outgoing,
        )));
        registry.register(Arc::new(SchemaResolver::new(relations)));
        registry.register(Arc::new(RelationAccessor::new(
            "attributes",
            relations.ids(Role::Attribute).to_vec(),
            Direction::Outgoing,
        )));
        for computed in relations.computed() {
            registry.register(Arc::new(RelationAccessor::new(
                computed.name.clone(),
                vec![computed.relation_id.clone()],
                computed.direction,
            )));
        }
        registry
    }

    /// Register a resolver, replacing any with the same name.
    pub fn register(&mut self, resolver: Arc<dyn RelationResolver>) {
        self.resolvers.insert(resolver.name().to_string(), resolver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RelationResolver>> {
        self.resolvers.get(name).cloned()
    }

    /// The resolver answering for `relation_id`, if any.
    pub fn by_relation(&self, relation_id: &str) -> Option<Arc<dyn RelationResolver>> {
        self.resolvers
            .values()
            .find(|r| r.relation_ids().iter().any(|id| id == relation_id))
            .cloned()
    }

    /// Registered accessor names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resolvers.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Type resolver ───────────────────────────────────────────────────────────

/// Read-side type and schema resolution over a [`TripleStore`].
pub struct TypeResolver {
    store: Arc<dyn TripleStore>,
    relations: Arc<RelationRegistry>,
    resolvers: ResolverRegistry,
}

impl TypeResolver {
    pub fn new(store: Arc<dyn TripleStore>, relations: Arc<RelationRegistry>) -> Self {
        let resolvers = ResolverRegistry::standard(&relations);
        Self {
            store,
            relations,
            resolvers,
        }
    }

    /// Add or replace a named resolver.
    pub fn register(&mut self, resolver: Arc<dyn RelationResolver>) {
        self.resolvers.register(resolver);
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    /// Every `t` with `(entity_id, TYPE, t)`.
    pub async fn types_of(&self, entity_id: &str) -> Result<BTreeSet<String>, SinkError> {
        let mut types = BTreeSet::new();
        for relation in self.relations.ids(Role::Type) {
            types.extend(
                self.store
                    .triples_by_entity_attribute(entity_id, relation)
                    .await?,
            );
        }
        Ok(types)
    }

    /// Every `e` with `(e, TYPE, type_id)`. `None` returns every typed entity.
    pub async fn entities_of_type(&self, type_id: Option<&str>) -> Result<Vec<String>, SinkError> {
        let mut entities = BTreeSet::new();
        for relation in self.relations.ids(Role::Type) {
            let found = match type_id {
                Some(t) => self.store.entities_by_attribute_value(relation, t).await?,
                None => self.store.entities_with_attribute(relation).await?,
            };
            entities.extend(found);
        }
        Ok(entities.into_iter().collect())
    }

    /// Attributes of every type of `entity_id`, deduplicated, in type order.
    pub async fn schema_of(&self, entity_id: &str) -> Result<Vec<String>, SinkError> {
        self.resolve("schema", entity_id).await
    }

    /// Value side of `(entity_id, ATTRIBUTE, *)`.
    pub async fn attributes_of(&self, entity_id: &str) -> Result<Vec<String>, SinkError> {
        self.resolve("attributes", entity_id).await
    }

    /// Entities flagged `is_type`.
    pub async fn list_types(&self) -> Result<Vec<Entity>, SinkError> {
        self.store.type_entities().await
    }

    /// Run the named resolver for `entity_id`.
    pub async fn resolve(&self, name: &str, entity_id: &str) -> Result<Vec<String>, SinkError> {
        let resolver = self
            .resolvers
            .get(name)
            .ok_or_else(|| SinkError::Query(format!("no resolver named '{name}'")))?;
        resolver.resolve(self.store.as_ref(), entity_id).await
    }
}
