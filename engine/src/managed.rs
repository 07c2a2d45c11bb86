//! Managed attributes: extensible key-value maps on a resource.
//!
//! Each key of a managed-attribute field is resolved by an ordered chain of
//! resolvers; the first one that decides wins:
//!
//! 1. a delete directive removes the key,
//! 2. a clear directive blanks it, overriding any edit,
//! 3. a non-empty submitted value is taken,
//! 4. an empty submitted value keeps the original record's value,
//! 5. otherwise whatever value is on hand is kept.
//!
//! Rule 4 is intentional: in bulk edits a blank input means "leave as is",
//! while clearing is an explicit directive.

use crate::FormValues;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Field name of the default managed-attribute map.
pub const DEFAULT_MANAGED_FIELD: &str = "managedAttributes";

/// What a cleared field is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearStyle {
    EmptyString,
    Null,
}

impl ClearStyle {
    pub fn value(&self) -> Value {
        match self {
            ClearStyle::EmptyString => Value::String(String::new()),
            ClearStyle::Null => Value::Null,
        }
    }
}

/// Per-submit clear and delete requests, keyed by field path
/// (`managedAttributes.someKey`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedAttributeDirectives {
    pub cleared_fields: BTreeMap<String, ClearStyle>,
    pub deleted_fields: BTreeSet<String>,
}

impl ManagedAttributeDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(mut self, path: impl Into<String>, style: ClearStyle) -> Self {
        self.cleared_fields.insert(path.into(), style);
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.deleted_fields.insert(path.into());
        self
    }

    /// The directives that apply to `field`, keyed by the bare attribute key.
    pub fn scoped(&self, field: &str) -> (BTreeMap<String, ClearStyle>, BTreeSet<String>) {
        let prefix = format!("{field}.");
        let cleared = self
            .cleared_fields
            .iter()
            .filter_map(|(path, style)| Some((path.strip_prefix(&prefix)?.to_string(), *style)))
            .collect();
        let deleted = self
            .deleted_fields
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect();
        (cleared, deleted)
    }

    /// Whether any directive targets `field`.
    pub fn targets(&self, field: &str) -> bool {
        let prefix = format!("{field}.");
        self.cleared_fields.keys().any(|p| p.starts_with(&prefix))
            || self.deleted_fields.iter().any(|p| p.starts_with(&prefix))
    }
}

/// Everything a resolver may look at for one managed field.
#[derive(Debug, Clone, Copy)]
pub struct ManagedInputs<'a> {
    pub submitted: Option<&'a FormValues>,
    pub original: Option<&'a FormValues>,
    pub cleared: &'a BTreeMap<String, ClearStyle>,
    pub deleted: &'a BTreeSet<String>,
}

impl ManagedInputs<'_> {
    fn submitted(&self, key: &str) -> Option<&Value> {
        self.submitted.and_then(|s| s.get(key))
    }

    fn original(&self, key: &str) -> Option<&Value> {
        self.original.and_then(|o| o.get(key))
    }

    /// Union of all keys mentioned by any input.
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        keys.extend(self.submitted.into_iter().flat_map(|m| m.keys().cloned()));
        keys.extend(self.original.into_iter().flat_map(|m| m.keys().cloned()));
        keys.extend(self.cleared.keys().cloned());
        keys.extend(self.deleted.iter().cloned());
        keys
    }
}

/// Outcome for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Set(Value),
    Omit,
}

/// One rule of the precedence chain. `None` defers to the next rule.
pub type Resolver = fn(&str, &ManagedInputs<'_>) -> Option<Resolution>;

fn is_blank(value: &Value) -> bool {
    value.as_str() == Some("")
}

pub fn resolve_deleted(key: &str, inputs: &ManagedInputs<'_>) -> Option<Resolution> {
    inputs.deleted.contains(key).then_some(Resolution::Omit)
}

pub fn resolve_cleared(key: &str, inputs: &ManagedInputs<'_>) -> Option<Resolution> {
    inputs.cleared.get(key).map(|style| Resolution::Set(style.value()))
}

pub fn resolve_submitted(key: &str, inputs: &ManagedInputs<'_>) -> Option<Resolution> {
    inputs
        .submitted(key)
        .filter(|v| !is_blank(v))
        .map(|v| Resolution::Set(v.clone()))
}

pub fn resolve_blank_keeps_original(key: &str, inputs: &ManagedInputs<'_>) -> Option<Resolution> {
    if !inputs.submitted(key).is_some_and(is_blank) {
        return None;
    }
    inputs.original(key).map(|v| Resolution::Set(v.clone()))
}

pub fn resolve_record_value(key: &str, inputs: &ManagedInputs<'_>) -> Option<Resolution> {
    inputs
        .submitted(key)
        .or_else(|| inputs.original(key))
        .map(|v| Resolution::Set(v.clone()))
}

/// Resolvers in priority order.
pub const PRECEDENCE: [Resolver; 5] = [
    resolve_deleted,
    resolve_cleared,
    resolve_submitted,
    resolve_blank_keeps_original,
    resolve_record_value,
];

/// Run the chain for one key. A key no rule decides is omitted.
pub fn resolve_key(key: &str, inputs: &ManagedInputs<'_>) -> Resolution {
    PRECEDENCE
        .iter()
        .find_map(|resolver| resolver(key, inputs))
        .unwrap_or(Resolution::Omit)
}

/// The merged managed-attribute map for `field`.
pub fn merge_managed_attributes(
    field: &str,
    submitted: Option<&FormValues>,
    original: Option<&FormValues>,
    directives: &ManagedAttributeDirectives,
) -> FormValues {
    let (cleared, deleted) = directives.scoped(field);
    let inputs = ManagedInputs {
        submitted,
        original,
        cleared: &cleared,
        deleted: &deleted,
    };

    inputs
        .keys()
        .into_iter()
        .filter_map(|key| match resolve_key(&key, &inputs) {
            Resolution::Set(value) => Some((key, value)),
            Resolution::Omit => None,
        })
        .collect()
}
