//! Relationship mappings.
//!
//! A [`RelationshipMapping`] says that one top-level field of submitted form
//! values is really a relationship, and how to turn it into a
//! [`RelationshipDocument`].

use crate::resource::id_of;
use crate::{Error, FormValues, Ref, RelationshipDocument, Relationships, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// How the source attribute is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipType {
    /// One `{id, type}` object (or null). Normalizes to zero or one refs.
    Single,
    /// An array of `{id, type}` objects.
    Array,
    /// Converted by the mapping's custom converter.
    Custom,
}

/// User-supplied conversion for [`RelationshipType::Custom`].
pub type CustomConverter = Arc<dyn Fn(&Value) -> Result<RelationshipDocument> + Send + Sync>;

/// Decides whether a persisted child differs from its original.
/// Called as `is_modified(original, current)`.
pub type ModifiedCheck = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Marks a relationship field as owning the full lifecycle of its children.
#[derive(Clone)]
pub struct NestedResource {
    pub resource_type: String,
    pub api_base_url: String,
    pub is_modified: Option<ModifiedCheck>,
}

impl NestedResource {
    pub fn new(resource_type: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            api_base_url: api_base_url.into(),
            is_modified: None,
        }
    }

    pub fn with_modified_check(mut self, check: ModifiedCheck) -> Self {
        self.is_modified = Some(check);
        self
    }

    /// Apply the configured check, or structural inequality by default.
    pub fn is_modified(&self, original: &Value, current: &Value) -> bool {
        match &self.is_modified {
            Some(check) => check(original, current),
            None => original != current,
        }
    }
}

impl fmt::Debug for NestedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedResource")
            .field("resource_type", &self.resource_type)
            .field("api_base_url", &self.api_base_url)
            .field("is_modified", &self.is_modified.is_some())
            .finish()
    }
}

/// Static description of one relationship field.
#[derive(Clone)]
pub struct RelationshipMapping {
    pub source_attribute: String,
    pub relationship_name: String,
    pub relationship_type: RelationshipType,
    pub custom_converter: Option<CustomConverter>,
    pub remove_source_attribute: bool,
    pub nested_resource: Option<NestedResource>,
}

impl RelationshipMapping {
    fn new(
        source_attribute: impl Into<String>,
        relationship_name: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            source_attribute: source_attribute.into(),
            relationship_name: relationship_name.into(),
            relationship_type,
            custom_converter: None,
            remove_source_attribute: false,
            nested_resource: None,
        }
    }

    pub fn single(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, RelationshipType::Single)
    }

    pub fn array(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, RelationshipType::Array)
    }

    /// A CUSTOM mapping. Use [`RelationshipMapping::with_converter`] to attach
    /// the converter; converting without one fails.
    pub fn custom(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, RelationshipType::Custom)
    }

    pub fn with_converter(mut self, converter: CustomConverter) -> Self {
        self.custom_converter = Some(converter);
        self
    }

    pub fn remove_source(mut self) -> Self {
        self.remove_source_attribute = true;
        self
    }

    pub fn nested(mut self, nested: NestedResource) -> Self {
        self.nested_resource = Some(nested);
        self
    }

    /// Reject mappings that cannot be saved. Nested children are always a
    /// list, so a nested field must be ARRAY or CUSTOM.
    pub fn validate(&self) -> Result<()> {
        if self.nested_resource.is_some() && self.relationship_type == RelationshipType::Single {
            return Err(Error::NestedSingle(self.relationship_name.clone()));
        }
        Ok(())
    }

    /// Convert a source attribute value (`None` when absent).
    pub fn convert(&self, value: Option<&Value>) -> Result<RelationshipDocument> {
        let default_type = self.nested_resource.as_ref().map(|n| n.resource_type.as_str());
        let value = value.unwrap_or(&Value::Null);
        match self.relationship_type {
            RelationshipType::Single => self.convert_single(value, default_type),
            RelationshipType::Array => self.convert_array(value, default_type),
            RelationshipType::Custom => {
                let converter = self
                    .custom_converter
                    .as_ref()
                    .ok_or_else(|| Error::MissingConverter(self.relationship_name.clone()))?;
                Ok(converter(value)?.normalized())
            }
        }
    }

    fn convert_single(&self, value: &Value, default_type: Option<&str>) -> Result<RelationshipDocument> {
        match value {
            Value::Null => Ok(RelationshipDocument::empty()),
            Value::Object(_) => Ok(RelationshipDocument::many(
                self.to_ref(value, default_type)?.into_iter().collect(),
            )),
            _ => Err(self.invalid("expected an object or null")),
        }
    }

    fn convert_array(&self, value: &Value, default_type: Option<&str>) -> Result<RelationshipDocument> {
        match value {
            Value::Null => Ok(RelationshipDocument::empty()),
            Value::Array(items) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    if !item.is_object() {
                        return Err(self.invalid("expected an array of objects"));
                    }
                    refs.extend(self.to_ref(item, default_type)?);
                }
                Ok(RelationshipDocument::many(refs))
            }
            _ => Err(self.invalid("expected an array or null")),
        }
    }

    /// Objects without an id (not yet created, or a cleared select) yield no ref.
    fn to_ref(&self, value: &Value, default_type: Option<&str>) -> Result<Option<Ref>> {
        let Some(id) = id_of(value) else {
            return Ok(None);
        };
        let resource_type = value
            .get("type")
            .and_then(Value::as_str)
            .or(default_type)
            .ok_or_else(|| self.invalid("reference has no type"))?;
        Ok(Some(Ref::new(id, resource_type)))
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidRelationshipValue {
            field: self.source_attribute.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for RelationshipMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipMapping")
            .field("source_attribute", &self.source_attribute)
            .field("relationship_name", &self.relationship_name)
            .field("relationship_type", &self.relationship_type)
            .field("custom_converter", &self.custom_converter.is_some())
            .field("remove_source_attribute", &self.remove_source_attribute)
            .field("nested_resource", &self.nested_resource)
            .finish()
    }
}

/// Run every mapping over `values`.
///
/// Every mapping gets an entry in the returned map, even when empty. Source
/// attributes are removed from `values` for mappings that ask for it.
pub fn extract_relationships(
    values: &mut FormValues,
    mappings: &[RelationshipMapping],
) -> Result<Relationships> {
    let mut relationships = Relationships::new();
    for mapping in mappings {
        let document = mapping.convert(values.get(&mapping.source_attribute))?;
        relationships.insert(mapping.relationship_name.clone(), document);
        if mapping.remove_source_attribute {
            values.remove(&mapping.source_attribute);
        }
    }
    Ok(relationships)
}

/// The relationships of a previously loaded record.
///
/// An explicit `relationships` member wins; otherwise each mapping is applied
/// to the record's flat source attribute, when present.
pub fn original_relationships(
    original: &FormValues,
    mappings: &[RelationshipMapping],
) -> Result<Relationships> {
    let explicit: Option<Relationships> = original
        .get("relationships")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    let mut relationships = Relationships::new();
    for mapping in mappings {
        let name = &mapping.relationship_name;
        if let Some(document) = explicit.as_ref().and_then(|r| r.get(name)) {
            relationships.insert(name.clone(), document.clone().normalized());
        } else if let Some(value) = original.get(&mapping.source_attribute) {
            relationships.insert(name.clone(), mapping.convert(Some(value))?);
        }
    }
    Ok(relationships)
}
