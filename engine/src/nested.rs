//! Nested child resources.
//!
//! A relationship field marked with a [`NestedResource`] owns the full
//! lifecycle of its children: new and modified children are saved, children
//! that disappeared from the form are deleted, and the parent ends up
//! pointing at whatever survived.

use crate::resource::id_of;
use crate::{NestedResource, ResourceId};
use serde_json::Value;
use std::collections::BTreeSet;

/// What to do with the children of one nested field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NestedPlan {
    /// New children and modified persisted ones, in form order.
    pub to_save: Vec<Value>,
    /// Persisted children that need no write.
    pub unchanged: Vec<Value>,
    /// Original children no longer present.
    pub removed: Vec<Value>,
}

impl NestedPlan {
    pub fn is_noop(&self) -> bool {
        self.to_save.is_empty() && self.removed.is_empty()
    }

    pub fn removed_ids(&self) -> Vec<ResourceId> {
        self.removed.iter().filter_map(id_of).collect()
    }

    /// The field's new value: saved children followed by unchanged ones.
    pub fn merged(&self, saved: Vec<Value>) -> Vec<Value> {
        let mut children = saved;
        children.extend(self.unchanged.iter().cloned());
        children
    }
}

fn children(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

/// Partition the current children of a nested field against the originals.
///
/// A child without an id is new. A child whose id matches an original is
/// saved only if `nested` reports it modified. A child carrying an id the
/// original never had is left alone.
pub fn partition_children(
    original: Option<&Value>,
    current: Option<&Value>,
    nested: &NestedResource,
) -> NestedPlan {
    let originals = children(original);
    let mut plan = NestedPlan::default();

    for child in children(current) {
        let Some(id) = id_of(child) else {
            plan.to_save.push(child.clone());
            continue;
        };
        match originals.iter().find(|o| id_of(o).as_deref() == Some(id.as_str())) {
            Some(before) if nested.is_modified(before, child) => plan.to_save.push(child.clone()),
            _ => plan.unchanged.push(child.clone()),
        }
    }

    let kept: BTreeSet<ResourceId> = children(current).iter().filter_map(id_of).collect();
    plan.removed = originals
        .iter()
        .filter(|o| id_of(o).is_some_and(|id| !kept.contains(&id)))
        .cloned()
        .collect();

    plan
}
