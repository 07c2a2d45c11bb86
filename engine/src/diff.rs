//! Attribute and relationship diffing.
//!
//! Only what changed is sent on update. Values are compared structurally;
//! relationships by the set of resources they reference.

use crate::{FormValues, RelationshipDocument, Relationships};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Keys handled by payload assembly, never diffed as attributes.
pub const RESERVED_KEYS: [&str; 3] = ["id", "type", "relationships"];

/// Applied to a submitted value before it is compared and sent.
pub type KeyTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Options for [`diff_attributes`].
#[derive(Clone, Default)]
pub struct DiffOptions {
    pub ignore_keys: BTreeSet<String>,
    pub key_transforms: BTreeMap<String, KeyTransform>,
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never include `key` in the diff.
    pub fn ignore(mut self, key: impl Into<String>) -> Self {
        self.ignore_keys.insert(key.into());
        self
    }

    /// Transform `key`'s submitted value before comparison.
    pub fn transform(mut self, key: impl Into<String>, transform: KeyTransform) -> Self {
        self.key_transforms.insert(key.into(), transform);
        self
    }
}

impl fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffOptions")
            .field("ignore_keys", &self.ignore_keys)
            .field("key_transforms", &self.key_transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The changed attributes of `values` relative to `original`.
///
/// Keys absent from `values` were not provided and never overwrite anything.
/// Keys in `skip` are diffed elsewhere (managed attributes).
pub fn diff_attributes(
    values: &FormValues,
    original: Option<&FormValues>,
    options: &DiffOptions,
    skip: &[String],
) -> FormValues {
    let mut diff = FormValues::new();
    for (key, value) in values {
        if RESERVED_KEYS.contains(&key.as_str())
            || options.ignore_keys.contains(key)
            || skip.iter().any(|s| s == key)
        {
            continue;
        }

        let value = match options.key_transforms.get(key) {
            Some(transform) => transform(value),
            None => value.clone(),
        };

        if original.and_then(|o| o.get(key)) != Some(&value) {
            diff.insert(key.clone(), value);
        }
    }
    diff
}

/// The relationships to send.
///
/// Creates send every non-empty relationship. Updates send only those whose
/// referenced set differs from the original; a relationship missing from the
/// original compares as empty.
pub fn diff_relationships(
    current: &Relationships,
    original: Option<&Relationships>,
    is_update: bool,
) -> Relationships {
    let empty = RelationshipDocument::empty();
    current
        .iter()
        .filter(|(name, document)| {
            if !is_update {
                return !document.is_empty();
            }
            let before = original.and_then(|o| o.get(*name)).unwrap_or(&empty);
            !document.same_members(before)
        })
        .map(|(name, document)| (name.clone(), document.clone()))
        .collect()
}
