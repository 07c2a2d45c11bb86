//! Wire serialization adapter.
//!
//! Forms and tables work with flat values; the wire carries JSON:API resource
//! objects. A [`ResourceCodec`] converts between the two.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use tandem_engine::{id_of, FormValues, OperationResult, Relationships, Resource};

/// Converts flat values to resource objects and response documents back.
pub trait ResourceCodec: Send + Sync {
    /// A flat value as a resource of `resource_type` (unless it names its own
    /// `type`).
    fn serialize(&self, resource_type: &str, values: &FormValues) -> Result<Resource>;

    /// A response document's primary data as flat values: an object, an
    /// array of objects, or null.
    fn deserialize(&self, data: Option<&Value>, included: Option<&[Value]>) -> Value;

    /// Flat values for one operation result.
    fn deserialize_result(&self, result: &OperationResult) -> Value {
        self.deserialize(result.data.as_ref(), result.included.as_deref())
    }
}

/// Default codec.
///
/// Serializing keeps `id`, `type` and `relationships`, drops `meta`, and puts
/// everything else under `attributes`. Deserializing merges `attributes`
/// with `id`/`type` and embeds relationship targets, resolved from
/// `included` when present. Relationships whose `data` is null are omitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatCodec;

const NON_ATTRIBUTE_KEYS: [&str; 4] = ["id", "type", "relationships", "meta"];

impl FlatCodec {
    fn flatten(&self, resource: &Value, included: &[Value], embed: bool) -> Value {
        let Some(object) = resource.as_object() else {
            return resource.clone();
        };

        let mut flat = Map::new();
        match object.get("attributes").and_then(Value::as_object) {
            Some(attributes) => flat.extend(attributes.clone()),
            None => flat.extend(
                object
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "relationships" | "links"))
                    .map(|(k, v)| (k.clone(), v.clone())),
            ),
        }
        for key in ["id", "type"] {
            if let Some(value) = object.get(key) {
                flat.insert(key.to_string(), value.clone());
            }
        }

        if embed {
            if let Some(relationships) = object.get("relationships").and_then(Value::as_object) {
                for (name, document) in relationships {
                    match document.get("data") {
                        None | Some(Value::Null) => {}
                        Some(Value::Array(refs)) => {
                            let items = refs.iter().map(|r| self.resolve(r, included)).collect();
                            flat.insert(name.clone(), Value::Array(items));
                        }
                        Some(reference) => {
                            flat.insert(name.clone(), self.resolve(reference, included));
                        }
                    }
                }
            }
        }

        Value::Object(flat)
    }

    /// The included resource matching `reference`, flattened one level, or
    /// the bare reference.
    fn resolve(&self, reference: &Value, included: &[Value]) -> Value {
        let matches = |candidate: &&Value| {
            candidate.get("type") == reference.get("type") && id_of(candidate) == id_of(reference)
        };
        match included.iter().find(matches) {
            Some(resource) => self.flatten(resource, included, false),
            None => reference.clone(),
        }
    }
}

impl ResourceCodec for FlatCodec {
    fn serialize(&self, resource_type: &str, values: &FormValues) -> Result<Resource> {
        let resource_type = values
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(resource_type)
            .to_string();

        let relationships: Option<Relationships> = match values.get("relationships") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw.clone()).map_err(|e| {
                Error::Decode(format!("invalid relationships on '{resource_type}': {e}"))
            })?),
        };

        let attributes = values
            .iter()
            .filter(|(k, _)| !NON_ATTRIBUTE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Resource {
            id: id_of(&Value::Object(values.clone())),
            resource_type,
            attributes,
            relationships,
        })
    }

    fn deserialize(&self, data: Option<&Value>, included: Option<&[Value]>) -> Value {
        let included = included.unwrap_or_default();
        match data {
            None | Some(Value::Null) => Value::Null,
            Some(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| self.flatten(item, included, true))
                    .collect(),
            ),
            Some(item) => self.flatten(item, included, true),
        }
    }
}
