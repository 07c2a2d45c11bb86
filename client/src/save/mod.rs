//! Differential saves.
//!
//! A form hands over what the user submitted and the record it was loaded
//! from. [`SubmitHandler::submit`] works out the smallest payload that
//! persists the difference and sends it:
//!
//! 1. run the configured transforms
//! 2. extract relationships from their source attributes
//! 3. diff plain attributes against the original
//! 4. merge managed-attribute fields key by key
//! 5. diff relationships
//! 6. save and delete nested children
//! 7. skip the network entirely when an update changes nothing
//! 8. assemble the payload and let `before_save` adjust it
//! 9. save it
//! 10. report through `on_success` and `after_save`
//!
//! Failures are logged and returned unchanged. Nothing is retried.

mod config;
mod nested;

pub use config::{NoHooks, SaveBackend, SaveHooks, SubmitConfig, ValueTransform};

use crate::client::{ApiClient, SaveArg};
use crate::error::Result;
use nested::NestedField;
use serde_json::Value;
use tandem_engine::{
    diff_attributes, diff_relationships, extract_relationships, merge_managed_attributes,
    original_relationships, FormValues, Relationships,
};

/// Runs differential saves against one client.
#[derive(Debug, Clone)]
pub struct SubmitHandler {
    api: ApiClient,
}

impl SubmitHandler {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Persist the difference between `submitted` and `original`.
    ///
    /// Without an original id the submission is a create, even when
    /// `original` carries initial form values. Returns the saved resource,
    /// or `None` when an update had nothing to send.
    pub async fn submit(
        &self,
        submitted: FormValues,
        original: Option<&FormValues>,
        config: &SubmitConfig,
    ) -> Result<Option<Value>> {
        match self.run(submitted, original, config).await {
            Ok(saved) => Ok(saved),
            Err(err) => {
                tracing::error!(
                    resource_type = %config.resource_type,
                    error = %err,
                    "Save failed"
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        submitted: FormValues,
        original: Option<&FormValues>,
        config: &SubmitConfig,
    ) -> Result<Option<Value>> {
        let backend: &dyn SaveBackend = match &config.backend {
            Some(backend) => backend.as_ref(),
            None => &self.api,
        };
        let mappings = &config.relationship_mappings;
        for mapping in mappings {
            mapping.validate()?;
        }
        // An original without an id only seeds a create form.
        let original_id = original.and_then(|o| o.get("id")).filter(|id| is_id(id));
        let is_update = original_id.is_some();

        let mut values = submitted;
        for transform in &config.transforms {
            values = transform.apply(values, &self.api).await?;
        }

        // Nested children are read before extraction may drop their source.
        let nested_fields = NestedField::collect(mappings, &values, original);

        let relationships = extract_relationships(&mut values, mappings)?;
        let before = original
            .map(|o| original_relationships(o, mappings))
            .transpose()?;

        let mut skip = config.managed_attribute_fields.clone();
        skip.extend(nested_fields.iter().map(|f| f.mapping.source_attribute.clone()));
        // Seeded create values are still sent.
        let baseline = if is_update { original } else { None };
        let mut diff = diff_attributes(&values, baseline, &config.diff_options, &skip);

        for field in &config.managed_attribute_fields {
            if !values.contains_key(field) && !config.directives.targets(field) {
                continue;
            }
            let merged = merge_managed_attributes(
                field,
                values.get(field).and_then(Value::as_object),
                original.and_then(|o| o.get(field)).and_then(Value::as_object),
                &config.directives,
            );
            if !merged.is_empty() {
                diff.insert(field.clone(), Value::Object(merged));
            }
        }

        let mut relationship_diff = diff_relationships(&relationships, before.as_ref(), is_update);

        for field in &nested_fields {
            let children = nested::reconcile(backend, field).await?;
            let name = field.mapping.relationship_name.clone();
            let document = field.mapping.convert(Some(&Value::Array(children)))?;

            relationship_diff.remove(&name);
            let current = Relationships::from([(name, document)]);
            relationship_diff.extend(diff_relationships(&current, before.as_ref(), is_update));
        }

        if is_update && diff.is_empty() && relationship_diff.is_empty() {
            tracing::debug!(resource_type = %config.resource_type, "Nothing changed, save skipped");
            let original = Value::Object(original.cloned().unwrap_or_default());
            config.hooks.on_success(&original).await?;
            config.hooks.after_save().await?;
            return Ok(None);
        }

        let mut payload = diff;
        payload.insert("type".to_string(), Value::String(config.resource_type.clone()));
        let id = match original {
            Some(_) => original_id,
            None => values.get("id").filter(|id| is_id(id)),
        };
        if let Some(id) = id {
            payload.insert("id".to_string(), id.clone());
        }
        if !relationship_diff.is_empty() {
            payload.insert("relationships".to_string(), serde_json::to_value(&relationship_diff)?);
        }
        config.hooks.before_save(&mut payload).await?;

        tracing::debug!(
            resource_type = %config.resource_type,
            attributes = payload.len(),
            relationships = relationship_diff.len(),
            "Saving resource"
        );
        let saved = backend
            .save(
                vec![SaveArg::save(payload, config.resource_type.clone())],
                &config.save_options,
            )
            .await?
            .into_iter()
            .next()
            .unwrap_or(Value::Null);

        config.hooks.on_success(&saved).await?;
        config.hooks.after_save().await?;
        Ok(Some(saved))
    }
}

fn is_id(value: &Value) -> bool {
    !value.is_null() && value.as_str() != Some("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SaveOptions;
    use crate::config::Config;
    use crate::error::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tandem_engine::{ClearStyle, DiffOptions, ManagedAttributeDirectives, RelationshipMapping};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<SaveArg>>>,
    }

    #[async_trait]
    impl SaveBackend for Recorder {
        async fn save(&self, args: Vec<SaveArg>, _options: &SaveOptions) -> Result<Vec<Value>> {
            self.calls.lock().unwrap().push(args.clone());
            Ok(args
                .into_iter()
                .map(|arg| match arg {
                    SaveArg::Save {
                        mut resource,
                        resource_type,
                    } => {
                        resource.entry("id").or_insert(json!("generated"));
                        resource.insert("type".into(), json!(resource_type));
                        Value::Object(resource)
                    }
                    SaveArg::Delete { .. } => Value::Null,
                })
                .collect())
        }
    }

    fn form(value: Value) -> FormValues {
        value.as_object().cloned().unwrap()
    }

    fn handler() -> SubmitHandler {
        SubmitHandler::new(ApiClient::new(Config::default()).unwrap())
    }

    fn person_config(backend: Arc<Recorder>) -> SubmitConfig {
        SubmitConfig::new("person", SaveOptions::new("/agent-api")).with_backend(backend)
    }

    fn saved_payload(recorder: &Recorder) -> FormValues {
        match &recorder.calls.lock().unwrap()[0][0] {
            SaveArg::Save { resource, .. } => resource.clone(),
            other => panic!("expected a save, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_sends_everything_but_empty_relationships() {
        let recorder = Arc::new(Recorder::default());
        let config = person_config(recorder.clone())
            .with_mapping(RelationshipMapping::single("organization", "organization").remove_source())
            .with_mapping(RelationshipMapping::array("roles", "roles").remove_source());

        let saved = handler()
            .submit(
                form(json!({"name": "John", "organization": {"id": "o1", "type": "organization"}, "roles": []})),
                None,
                &config,
            )
            .await
            .unwrap();

        assert_eq!(saved.unwrap()["id"], json!("generated"));
        assert_eq!(
            saved_payload(&recorder),
            form(json!({
                "name": "John",
                "type": "person",
                "relationships": {"organization": {"data": [{"id": "o1", "type": "organization"}]}}
            }))
        );
    }

    #[tokio::test]
    async fn transforms_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        let upper = |mut values: FormValues, _: &ApiClient| -> Result<FormValues> {
            let name = values["name"].as_str().unwrap_or_default().to_uppercase();
            values.insert("name".into(), json!(name));
            Ok(values)
        };
        let suffix = |mut values: FormValues, _: &ApiClient| -> Result<FormValues> {
            let name = format!("{}!", values["name"].as_str().unwrap_or_default());
            values.insert("name".into(), json!(name));
            Ok(values)
        };
        let config = person_config(recorder.clone())
            .with_transform(Arc::new(upper))
            .with_transform(Arc::new(suffix));

        handler()
            .submit(form(json!({"name": "john"})), None, &config)
            .await
            .unwrap();

        assert_eq!(saved_payload(&recorder)["name"], json!("JOHN!"));
    }

    #[tokio::test]
    async fn ignored_keys_and_key_transforms() {
        let recorder = Arc::new(Recorder::default());
        let trim: tandem_engine::KeyTransform =
            Arc::new(|v: &Value| json!(v.as_str().unwrap_or_default().trim()));
        let config = person_config(recorder.clone())
            .with_diff_options(DiffOptions::new().ignore("uiOnly").transform("email", trim));
        let original = form(json!({"id": "1", "type": "person", "email": "a@x.com"}));

        let saved = handler()
            .submit(
                form(json!({"id": "1", "email": " a@x.com ", "uiOnly": true})),
                Some(&original),
                &config,
            )
            .await
            .unwrap();

        assert!(saved.is_none());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn managed_attributes_bypass_equality() {
        let recorder = Arc::new(Recorder::default());
        let config = person_config(recorder.clone()).with_directives(
            ManagedAttributeDirectives::new().clear("managedAttributes.color", ClearStyle::Null),
        );
        let original = form(json!({
            "id": "1",
            "type": "person",
            "managedAttributes": {"color": "red", "size": "L"}
        }));

        handler()
            .submit(
                form(json!({"id": "1", "managedAttributes": {"color": "red", "size": "L"}})),
                Some(&original),
                &config,
            )
            .await
            .unwrap();

        assert_eq!(
            saved_payload(&recorder),
            form(json!({
                "managedAttributes": {"color": null, "size": "L"},
                "type": "person",
                "id": "1"
            }))
        );
    }

    #[tokio::test]
    async fn custom_mapping_without_converter_fails_before_saving() {
        let recorder = Arc::new(Recorder::default());
        let config =
            person_config(recorder.clone()).with_mapping(RelationshipMapping::custom("owner", "owner"));

        let result = handler()
            .submit(form(json!({"owner": {"id": "1"}})), None, &config)
            .await;

        assert!(matches!(result, Err(Error::Engine(_))));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn before_save_may_edit_the_payload() {
        struct Stamp;

        #[async_trait]
        impl SaveHooks for Stamp {
            async fn before_save(&self, payload: &mut FormValues) -> Result<()> {
                payload.insert("group".into(), json!("aafc"));
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder::default());
        let config = person_config(recorder.clone()).with_hooks(Arc::new(Stamp));

        handler()
            .submit(form(json!({"name": "John"})), None, &config)
            .await
            .unwrap();

        assert_eq!(saved_payload(&recorder)["group"], json!("aafc"));
    }
}
