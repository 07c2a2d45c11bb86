//! Saving and deleting the children of nested relationship fields.

use super::config::SaveBackend;
use crate::client::{SaveArg, SaveOptions};
use crate::error::Result;
use serde_json::Value;
use tandem_engine::{partition_children, FormValues, NestedResource, RelationshipMapping};

/// One nested field, captured before relationship extraction can remove it.
pub(crate) struct NestedField<'a> {
    pub mapping: &'a RelationshipMapping,
    pub nested: &'a NestedResource,
    pub original: Option<Value>,
    pub current: Option<Value>,
}

impl<'a> NestedField<'a> {
    /// Every nested mapping whose field was submitted, with its current and
    /// original children. A field the form never sent is left alone.
    pub fn collect(
        mappings: &'a [RelationshipMapping],
        values: &FormValues,
        original: Option<&FormValues>,
    ) -> Vec<Self> {
        mappings
            .iter()
            .filter_map(|mapping| {
                let nested = mapping.nested_resource.as_ref()?;
                let source = &mapping.source_attribute;
                let current = values.get(source)?;
                Some(NestedField {
                    mapping,
                    nested,
                    original: original.and_then(|o| o.get(source)).cloned(),
                    current: Some(current.clone()),
                })
            })
            .collect()
    }
}

/// Save new and modified children, delete removed ones, and return the
/// field's new children: the saved ones followed by the unchanged ones.
///
/// Saves and deletes are separate calls against the child's own backend;
/// an empty side is not sent.
pub(crate) async fn reconcile(backend: &dyn SaveBackend, field: &NestedField<'_>) -> Result<Vec<Value>> {
    let plan = partition_children(field.original.as_ref(), field.current.as_ref(), field.nested);
    let options = SaveOptions::new(field.nested.api_base_url.clone());
    let resource_type = &field.nested.resource_type;

    if plan.is_noop() {
        return Ok(plan.merged(Vec::new()));
    }

    tracing::debug!(
        field = %field.mapping.source_attribute,
        resource_type = %resource_type,
        saves = plan.to_save.len(),
        deletes = plan.removed.len(),
        "Reconciling nested resources"
    );

    let mut saved = Vec::new();
    if !plan.to_save.is_empty() {
        let args = plan
            .to_save
            .iter()
            .map(|child| {
                let mut values = child.as_object().cloned().unwrap_or_default();
                values.remove("type");
                SaveArg::save(values, resource_type.clone())
            })
            .collect();
        saved = backend.save(args, &options).await?;
    }

    let removed = plan.removed_ids();
    if !removed.is_empty() {
        let args = removed
            .into_iter()
            .map(|id| SaveArg::delete(resource_type.clone(), id))
            .collect();
        backend.save(args, &options).await?;
    }

    Ok(plan.merged(saved))
}
