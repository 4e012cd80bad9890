//! Registry of relation ids that carry structural meaning.
//!
//! Type membership, schema attachment, naming, descriptions, value types and
//! space creation are all expressed as ordinary triples whose attribute is one of a handful of
//! reserved ids. The ids are resolved once at startup and looked up through
//! this registry; nothing else in the crate spells them out.
//!
//! A role may be bound to several ids (one canonical id plus aliases) so
//! deployments that renamed a relation keep resolving both generations.

use std::collections::HashMap;

use crate::error::SinkError;

/// Structural role of a reserved relation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// `(e, TYPE, t)`: entity `e` is of type `t`.
    Type,
    /// `(a, ATTRIBUTE_OF_TYPE, t)`: attribute `a` belongs to the schema of `t`.
    AttributeOfType,
    /// `(e, ATTRIBUTE, v)`: the has-attribute-value aggregation.
    Attribute,
    /// `(e, NAME, "text")`: display name of `e`.
    Name,
    /// `(e, DESCRIPTION, "text")`: free-text description of `e`.
    Description,
    /// `(a, VALUE_TYPE, v)`: attribute `a` holds values of kind `v`.
    ValueType,
    /// `(e, SPACE, "0xaddr")`: a new space at the given address.
    Space,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Type,
        Role::AttributeOfType,
        Role::Attribute,
        Role::Name,
        Role::Description,
        Role::ValueType,
        Role::Space,
    ];

    /// Environment variable that overrides this role's ids.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Type => "RELATION_TYPE",
            Self::AttributeOfType => "RELATION_ATTRIBUTE_OF_TYPE",
            Self::Attribute => "RELATION_ATTRIBUTE",
            Self::Name => "RELATION_NAME",
            Self::Description => "RELATION_DESCRIPTION",
            Self::ValueType => "RELATION_VALUE_TYPE",
            Self::Space => "RELATION_SPACE",
        }
    }

    fn default_id(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::AttributeOfType => "attribute-of-type",
            Self::Attribute => "attribute",
            Self::Name => "name",
            Self::Description => "description",
            Self::ValueType => "value-type",
            Self::Space => "space",
        }
    }
}

pub const DEFAULT_SCHEMA_TYPE: &str = "schema-type";

/// Value type entity whose attributes point at other entities.
pub const DEFAULT_RELATION_VALUE_TYPE: &str = "relation";

/// Direction of a computed relation accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Value side of `(e, rel, *)`.
    Outgoing,
    /// Entity side of `(*, rel, e)`.
    Incoming,
}

/// A named accessor over an arbitrary relation, e.g. `opposing_arguments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedRelation {
    pub name: String,
    pub relation_id: String,
    pub direction: Direction,
}

/// Reserved relation ids, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RelationRegistry {
    ids: HashMap<Role, Vec<String>>,
    by_id: HashMap<String, Role>,
    schema_type: String,
    relation_value_types: Vec<String>,
    computed: Vec<ComputedRelation>,
}

impl Default for RelationRegistry {
    fn default() -> Self {
        let mut registry = Self {
            ids: HashMap::new(),
            by_id: HashMap::new(),
            schema_type: DEFAULT_SCHEMA_TYPE.to_string(),
            relation_value_types: vec![DEFAULT_RELATION_VALUE_TYPE.to_string()],
            computed: vec![ComputedRelation {
                name: "opposing_arguments".into(),
                relation_id: "opposing-arguments".into(),
                direction: Direction::Outgoing,
            }],
        };
        for role in Role::ALL {
            registry.bind(role, vec![role.default_id().to_string()]);
        }
        registry
    }
}

impl RelationRegistry {
    /// Build a registry from defaults overridden by `lookup`.
    ///
    /// Each `RELATION_*` variable is a comma-separated list whose first id is
    /// canonical. `COMPUTED_RELATIONS` is `name=relation_id[:incoming],...`
    /// and replaces the built-in accessors when set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SinkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::default();

        for role in Role::ALL {
            if let Some(raw) = lookup(role.env_var()) {
                let ids = split_list(&raw);
                if ids.is_empty() {
                    return Err(SinkError::Config(format!(
                        "{} must name at least one relation id",
                        role.env_var()
                    )));
                }
                registry.bind(role, ids);
            }
        }

        if let Some(raw) = lookup("SCHEMA_TYPE_ENTITY") {
            let id = raw.trim();
            if id.is_empty() {
                return Err(SinkError::Config("SCHEMA_TYPE_ENTITY is empty".into()));
            }
            registry.schema_type = id.to_string();
        }

        if let Some(raw) = lookup("VALUE_TYPE_RELATION_ENTITY") {
            let ids = split_list(&raw);
            if ids.is_empty() {
                return Err(SinkError::Config("VALUE_TYPE_RELATION_ENTITY is empty".into()));
            }
            registry.relation_value_types = ids;
        }

        if let Some(raw) = lookup("COMPUTED_RELATIONS") {
            registry.computed = split_list(&raw)
                .iter()
                .map(|entry| parse_computed(entry))
                .collect::<Result<_, _>>()?;
        }

        registry.check_disjoint()?;
        Ok(registry)
    }

    /// Replace the ids bound to `role`. The first id is canonical.
    ///
    /// An id another role already claims is taken over; the overlap is
    /// reported by [`from_lookup`](Self::from_lookup) once every role is
    /// bound, since a later override may release it again.
    pub fn bind(&mut self, role: Role, ids: Vec<String>) {
        if let Some(old) = self.ids.remove(&role) {
            for id in old {
                if self.by_id.get(&id) == Some(&role) {
                    self.by_id.remove(&id);
                }
            }
        }
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                self.by_id.insert(id.clone(), role);
                unique.push(id);
            }
        }
        self.ids.insert(role, unique);
    }

    /// Builder-style [`bind`](Self::bind).
    pub fn with(mut self, role: Role, ids: &[&str]) -> Self {
        self.bind(role, ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_schema_type(mut self, id: impl Into<String>) -> Self {
        self.schema_type = id.into();
        self
    }

    pub fn with_computed(mut self, relation: ComputedRelation) -> Self {
        self.computed.push(relation);
        self
    }

    /// The structural role of `attribute_id`, if it is reserved.
    pub fn role_of(&self, attribute_id: &str) -> Option<Role> {
        self.by_id.get(attribute_id).copied()
    }

    /// All ids bound to `role`, canonical first.
    pub fn ids(&self, role: Role) -> &[String] {
        self.ids.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The canonical id of `role`.
    pub fn canonical(&self, role: Role) -> &str {
        self.ids(role).first().map(String::as_str).unwrap_or("")
    }

    /// The entity that marks its subjects as types.
    pub fn schema_type(&self) -> &str {
        &self.schema_type
    }

    /// Whether attributes of value type `value_type_id` hold entity ids.
    pub fn is_relation_value_type(&self, value_type_id: &str) -> bool {
        self.relation_value_types.iter().any(|id| id == value_type_id)
    }

    pub fn computed(&self) -> &[ComputedRelation] {
        &self.computed
    }

    fn check_disjoint(&self) -> Result<(), SinkError> {
        for role in Role::ALL {
            for id in self.ids(role) {
                if let Some(owner) = self.by_id.get(id).filter(|owner| **owner != role) {
                    return Err(SinkError::Config(format!(
                        "relation id '{id}' is bound to both {} and {}",
                        role.env_var(),
                        owner.env_var()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_computed(entry: &str) -> Result<ComputedRelation, SinkError> {
    let invalid = || {
        SinkError::Config(format!(
            "invalid COMPUTED_RELATIONS entry '{entry}' (expected name=relation_id[:incoming])"
        ))
    };
    let (name, rest) = entry.split_once('=').ok_or_else(invalid)?;
    let (relation_id, direction) = match rest.rsplit_once(':') {
        Some((id, "incoming")) => (id, Direction::Incoming),
        Some((id, "outgoing")) => (id, Direction::Outgoing),
        _ => (rest, Direction::Outgoing),
    };
    let (name, relation_id) = (name.trim(), relation_id.trim());
    if name.is_empty() || relation_id.is_empty() {
        return Err(invalid());
    }
    Ok(ComputedRelation {
        name: name.to_string(),
        relation_id: relation_id.to_string(),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_resolve_every_role() {
        let registry = RelationRegistry::default();
        for role in Role::ALL {
            let id = registry.canonical(role).to_string();
            assert_eq!(registry.role_of(&id), Some(role));
        }
        assert_eq!(registry.role_of("parent"), None);
        assert_eq!(registry.schema_type(), DEFAULT_SCHEMA_TYPE);
    }

    #[test]
    fn aliases_share_a_role() {
        let registry =
            RelationRegistry::from_lookup(env(&[("RELATION_TYPE", "type-v2, type-v1")])).unwrap();
        assert_eq!(registry.canonical(Role::Type), "type-v2");
        assert_eq!(registry.role_of("type-v1"), Some(Role::Type));
        assert_eq!(registry.role_of("type"), None);
    }

    #[test]
    fn computed_relations_parse() {
        let registry = RelationRegistry::from_lookup(env(&[(
            "COMPUTED_RELATIONS",
            "opposing_arguments=rel-opp,supported_by=rel-sup:incoming",
        )]))
        .unwrap();
        let computed = registry.computed();
        assert_eq!(computed.len(), 2);
        assert_eq!(computed[0].relation_id, "rel-opp");
        assert_eq!(computed[0].direction, Direction::Outgoing);
        assert_eq!(computed[1].name, "supported_by");
        assert_eq!(computed[1].direction, Direction::Incoming);
    }

    #[test]
    fn rejects_malformed_overrides() {
        assert!(RelationRegistry::from_lookup(env(&[("RELATION_NAME", " , ")])).is_err());
        assert!(RelationRegistry::from_lookup(env(&[("COMPUTED_RELATIONS", "no-equals")])).is_err());
        // "name" would be both Name and Type.
        assert!(RelationRegistry::from_lookup(env(&[("RELATION_TYPE", "name")])).is_err());
        assert!(RelationRegistry::from_lookup(env(&[("VALUE_TYPE_RELATION_ENTITY", "")])).is_err());
    }

    #[test]
    fn id_can_move_between_roles() {
        let registry = RelationRegistry::from_lookup(env(&[
            ("RELATION_TYPE", "name"),
            ("RELATION_NAME", "label"),
        ]))
        .unwrap();
        assert_eq!(registry.role_of("name"), Some(Role::Type));
        assert_eq!(registry.role_of("label"), Some(Role::Name));
        assert_eq!(registry.role_of("type"), None);
    }

    #[test]
    fn conflict_names_both_roles() {
        let err = RelationRegistry::from_lookup(env(&[("RELATION_DESCRIPTION", "name")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("RELATION_DESCRIPTION"), "{err}");
        assert!(err.contains("RELATION_NAME"), "{err}");
    }

    #[test]
    fn repeated_id_in_one_role_is_not_a_conflict() {
        let registry =
            RelationRegistry::from_lookup(env(&[("RELATION_NAME", "label,label")])).unwrap();
        assert_eq!(registry.ids(Role::Name), ["label".to_string()]);
    }

    #[test]
    fn relation_value_types_are_configurable() {
        let registry = RelationRegistry::default();
        assert!(registry.is_relation_value_type(DEFAULT_RELATION_VALUE_TYPE));
        assert!(!registry.is_relation_value_type("text"));

        let registry = RelationRegistry::from_lookup(env(&[(
            "VALUE_TYPE_RELATION_ENTITY",
            "rel-v2,rel-v1",
        )]))
        .unwrap();
        assert!(registry.is_relation_value_type("rel-v1"));
        assert!(!registry.is_relation_value_type(DEFAULT_RELATION_VALUE_TYPE));
    }
}
