//! Resource and relationship types.
//!
//! A [`Resource`] is the JSON:API wire shape. Forms and tables work with flat
//! [`FormValues`] instead, where attributes and relationship fields sit side by
//! side on one object.

use crate::{ResourceId, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Flat key-value form of a resource, as submitted by forms or produced by
/// deserializing a response.
pub type FormValues = Map<String, Value>;

/// A `{id, type}` pointer to another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl Ref {
    pub fn new(id: impl Into<ResourceId>, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// The `data` member of a relationship document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    Many(Vec<Ref>),
    One(Ref),
}

/// `{ data: null | Ref | Ref[] }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipDocument {
    #[serde(default)]
    pub data: Option<RelationshipData>,
}

impl RelationshipDocument {
    /// A document holding a list of references.
    pub fn many(refs: Vec<Ref>) -> Self {
        Self {
            data: Some(RelationshipData::Many(refs)),
        }
    }

    /// The normalized empty document (`data: []`).
    pub fn empty() -> Self {
        Self::many(Vec::new())
    }

    /// All references held by this document, in order.
    pub fn refs(&self) -> Vec<Ref> {
        match &self.data {
            None => Vec::new(),
            Some(RelationshipData::One(r)) => vec![r.clone()],
            Some(RelationshipData::Many(refs)) => refs.clone(),
        }
    }

    /// Convert to the internal `Ref[]` representation.
    pub fn normalized(self) -> Self {
        match self.data {
            Some(RelationshipData::Many(_)) => self,
            _ => Self::many(self.refs()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            None => true,
            Some(RelationshipData::One(_)) => false,
            Some(RelationshipData::Many(refs)) => refs.is_empty(),
        }
    }

    /// Set equality over the referenced resources. Order and duplicates are
    /// ignored.
    pub fn same_members(&self, other: &RelationshipDocument) -> bool {
        let left: BTreeSet<Ref> = self.refs().into_iter().collect();
        let right: BTreeSet<Ref> = other.refs().into_iter().collect();
        left == right
    }
}

/// Relationship documents keyed by relationship name.
pub type Relationships = BTreeMap<String, RelationshipDocument>;

/// A JSON:API resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
}

impl Resource {
    /// Create an input resource (no id yet).
    pub fn new(resource_type: impl Into<ResourceType>) -> Self {
        Self {
            id: None,
            resource_type: resource_type.into(),
            attributes: Map::new(),
            relationships: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ResourceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Whether the resource already exists on the backend.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// A reference to this resource, if it has an id.
    pub fn reference(&self) -> Option<Ref> {
        self.id
            .as_ref()
            .map(|id| Ref::new(id.clone(), self.resource_type.clone()))
    }
}

/// Read an `id` member as a string. Numeric ids are accepted and stringified.
pub fn id_of(value: &Value) -> Option<ResourceId> {
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
