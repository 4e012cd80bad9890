//! Action document decoding.
//!
//! Each stream entry carries a JSON document of the form
//!
//! ```json
//! {"type": "root", "version": "0.0.1", "actions": [
//!   {"type": "createEntity", "entityId": "e1"},
//!   {"type": "createTriple", "entityId": "e1", "attributeId": "name",
//!    "value": {"type": "string", "id": "v1", "value": "Goal A"}},
//!   {"type": "deleteTriple", "entityId": "e1", "attributeId": "parent",
//!    "value": {"type": "entity", "id": "e0"}}
//! ]}
//! ```

use serde::Deserialize;

use crate::error::SinkError;
use crate::stream::RawEntry;
use crate::types::{Literal, ValueType};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionDocument {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub version: Option<String>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    CreateEntity {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
    CreateTriple {
        #[serde(rename = "entityId")]
        entity_id: String,
        #[serde(rename = "attributeId")]
        attribute_id: String,
        value: TripleValue,
    },
    DeleteTriple {
        #[serde(rename = "entityId")]
        entity_id: String,
        #[serde(rename = "attributeId")]
        attribute_id: String,
        value: TripleValue,
    },
}

/// The object of a triple: another entity or a literal with its own id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TripleValue {
    Number { id: String, value: serde_json::Number },
    String { id: String, value: String },
    Image { id: String, value: String },
    Entity { id: String },
    Date { id: String, value: String },
    Url { id: String, value: String },
}

impl TripleValue {
    /// The id stored in the triple's `value_id` column.
    pub fn id(&self) -> &str {
        match self {
            Self::Number { id, .. }
            | Self::String { id, .. }
            | Self::Image { id, .. }
            | Self::Entity { id }
            | Self::Date { id, .. }
            | Self::Url { id, .. } => id,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Number { .. } => ValueType::Number,
            Self::String { .. } => ValueType::String,
            Self::Image { .. } => ValueType::Image,
            Self::Entity { .. } => ValueType::Entity,
            Self::Date { .. } => ValueType::Date,
            Self::Url { .. } => ValueType::Url,
        }
    }

    /// String content, for string values only.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Literal content, `None` for entity references.
    pub fn literal(&self) -> Option<Literal> {
        let value = match self {
            Self::Number { value, .. } => value.to_string(),
            Self::String { value, .. }
            | Self::Image { value, .. }
            | Self::Date { value, .. }
            | Self::Url { value, .. } => value.clone(),
            Self::Entity { .. } => return None,
        };
        Some(Literal {
            value_id: self.id().to_string(),
            value_type: self.value_type(),
            value,
        })
    }
}

/// Decode the action document of `entry`, the `index`-th entry at `position`.
pub fn decode_entry(
    position: u64,
    index: usize,
    entry: &RawEntry,
) -> Result<ActionDocument, SinkError> {
    let fail = |reason: String| SinkError::Decode {
        position,
        reason: format!("entry {index} (space {}): {reason}", entry.space),
    };
    if entry.space.is_empty() {
        return Err(fail("missing space".into()));
    }
    let doc = match &entry.payload {
        serde_json::Value::String(raw) => serde_json::from_str(raw),
        other => ActionDocument::deserialize(other),
    };
    doc.map_err(|e| fail(e.to_string()))
}
