//! Mutation planner: turns decoded actions into row mutations and DDL.
//!
//! Planning is pure: it reads nothing from the store. Structural relations
//! (type, attribute-of-type, name, description, value type, space) are
//! recognized through the [`RelationRegistry`] and expanded into the extra
//! mutations and schema changes they imply.
//!
//! Every entity an entry touches is stamped with the entry's space, which
//! the store keeps as `defined_in` the first time it sees the entity.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::decode::{Action, TripleValue};
use crate::ident;
use crate::relations::{RelationRegistry, Role};
use crate::types::{ColumnDef, EntityUpsert, ExtensionRow, Mutation, SchemaChange, Triple};

/// Output of planning one or more action documents.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Structure the mutations depend on, in first-needed order.
    pub schema: Vec<SchemaChange>,
    /// Row mutations in stream order.
    pub mutations: Vec<Mutation>,
}

impl Plan {
    pub fn extend(&mut self, other: Plan) {
        self.schema.extend(other.schema);
        self.mutations.extend(other.mutations);
    }
}

pub struct MutationPlanner {
    relations: Arc<RelationRegistry>,
}

impl MutationPlanner {
    pub fn new(relations: Arc<RelationRegistry>) -> Self {
        Self { relations }
    }

    /// Plan the actions of one entry published to `space_id`.
    ///
    /// Every entity a triple references is upserted before the triple, so
    /// readers never see an edge to a missing node.
    pub fn plan(&self, space_id: &str, actions: &[Action]) -> Plan {
        let relation_attributes = self.relation_attributes(actions);
        let mut plan = Plan::default();
        for action in actions {
            match action {
                Action::CreateEntity { entity_id } => {
                    plan.mutations.push(Mutation::UpsertEntity(
                        EntityUpsert::touch(entity_id).in_space(space_id),
                    ));
                }
                Action::CreateTriple {
                    entity_id,
                    attribute_id,
                    value,
                } => self.plan_create(
                    &mut plan,
                    space_id,
                    entity_id,
                    attribute_id,
                    value,
                    &relation_attributes,
                ),
                Action::DeleteTriple {
                    entity_id,
                    attribute_id,
                    value,
                } => {
                    plan.mutations.push(Mutation::DeleteTriple(Triple::new(
                        entity_id,
                        attribute_id,
                        value.id(),
                    )));
                }
            }
        }
        plan
    }

    /// Attributes given a value type in `actions`, mapped to whether that
    /// value type is a relation. The last declaration wins.
    fn relation_attributes<'a>(&self, actions: &'a [Action]) -> HashMap<&'a str, bool> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::CreateTriple {
                    entity_id,
                    attribute_id,
                    value: TripleValue::Entity { id },
                } if self.relations.role_of(attribute_id) == Some(Role::ValueType) => {
                    Some((entity_id.as_str(), self.relations.is_relation_value_type(id)))
                }
                _ => None,
            })
            .collect()
    }

    fn plan_create(
        &self,
        plan: &mut Plan,
        space_id: &str,
        entity_id: &str,
        attribute_id: &str,
        value: &TripleValue,
        relation_attributes: &HashMap<&str, bool>,
    ) {
        let value_id = value.id();
        let role = self.relations.role_of(attribute_id);

        // Entities first, carrying whatever the relation says about them.
        let mut subject = EntityUpsert::touch(entity_id).in_space(space_id);
        let mut object = EntityUpsert::touch(value_id).in_space(space_id);
        match role {
            Some(Role::Name) => subject.name = value.as_text().map(str::to_string),
            Some(Role::Description) => {
                subject.description = value.as_text().map(str::to_string)
            }
            Some(Role::ValueType) => match value {
                TripleValue::Entity { id } => subject.value_type = Some(id.clone()),
                _ => warn!(entity = entity_id, "value type relation without an entity value, ignored"),
            },
            Some(Role::Type) => {
                object.is_type = Some(true);
                if value_id == self.relations.schema_type() {
                    subject.is_type = Some(true);
                }
            }
            Some(Role::AttributeOfType) if matches!(value, TripleValue::Entity { .. }) => {
                object.is_type = Some(true);
            }
            _ => {}
        }
        plan.mutations.push(Mutation::UpsertEntity(subject));
        plan.mutations.push(Mutation::UpsertEntity(
            EntityUpsert::touch(attribute_id).in_space(space_id),
        ));
        if value_id != entity_id || object.is_type.is_some() {
            plan.mutations.push(Mutation::UpsertEntity(object));
        }
        if let Some(literal) = value.literal() {
            plan.mutations.push(Mutation::UpsertLiteral(literal));
        }
        plan.mutations
            .push(Mutation::UpsertTriple(Triple::new(entity_id, attribute_id, value_id)));

        match role {
            Some(Role::Type) => self.plan_type_row(plan, space_id, entity_id, value_id),
            Some(Role::AttributeOfType) => {
                if let TripleValue::Entity { id: type_id } = value {
                    let relation = relation_attributes.get(entity_id).copied().unwrap_or(false);
                    self.plan_attribute_column(plan, space_id, entity_id, type_id, relation);
                }
            }
            Some(Role::Space) => match value {
                TripleValue::String { value: address, .. } => {
                    if let Some(change) = space_change(address) {
                        plan.schema.push(change);
                    }
                }
                _ => warn!(entity = entity_id, "space relation without a string address, ignored"),
            },
            _ => {}
        }
    }

    /// `(e, TYPE, t)`: make sure `t`'s table exists in the space and give
    /// `e` a row in it.
    fn plan_type_row(&self, plan: &mut Plan, space_id: &str, entity_id: &str, type_id: &str) {
        let Some(space) = space_change(space_id) else {
            return;
        };
        let schema_name = ident::schema_name_for(space_id);
        if let Err(e) = ident::validate(type_id) {
            warn!(error = %e, space = space_id, "skipping extension table");
            return;
        }
        plan.schema.push(space);
        plan.schema.push(SchemaChange::EnsureTable {
            space_id: space_id.to_string(),
            schema_name: schema_name.clone(),
            type_name: type_id.to_string(),
            columns: BTreeSet::new(),
        });
        plan.mutations.push(Mutation::InsertExtensionRow(ExtensionRow {
            space_id: space_id.to_string(),
            schema_name,
            type_name: type_id.to_string(),
            row_id: entity_id.to_string(),
            entity_id: entity_id.to_string(),
        }));
    }

    /// `(a, ATTRIBUTE_OF_TYPE, t)`: add a column for `a` to `t`'s table.
    /// `relation` comes from a value type declared in the same entry.
    fn plan_attribute_column(
        &self,
        plan: &mut Plan,
        space_id: &str,
        attribute_id: &str,
        type_id: &str,
        relation: bool,
    ) {
        let Some(space) = space_change(space_id) else {
            return;
        };
        let column = ColumnDef::for_attribute(attribute_id, relation);
        if let Err(e) = ident::validate(type_id).and_then(|_| ident::validate(&column.name)) {
            warn!(error = %e, space = space_id, "skipping extension column");
            return;
        }
        plan.schema.push(space);
        plan.schema.push(SchemaChange::EnsureTable {
            space_id: space_id.to_string(),
            schema_name: ident::schema_name_for(space_id),
            type_name: type_id.to_string(),
            columns: BTreeSet::from([column]),
        });
    }
}

/// `EnsureSpace` for an address, or `None` if it is not a usable schema name.
fn space_change(space_id: &str) -> Option<SchemaChange> {
    let schema_name = ident::schema_name_for(space_id);
    match ident::validate(&schema_name) {
        Ok(()) => Some(SchemaChange::EnsureSpace {
            space_id: space_id.to_string(),
            schema_name,
        }),
        Err(e) => {
            warn!(error = %e, "skipping space provisioning");
            None
        }
    }
}
