//! Per-form save configuration and the seams a form plugs into.

use crate::client::{ApiClient, SaveArg, SaveOptions};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tandem_engine::{
    DiffOptions, FormValues, ManagedAttributeDirectives, RelationshipMapping, DEFAULT_MANAGED_FIELD,
};

/// Rewrites submitted values before anything else looks at them.
///
/// Transforms run in order, each seeing the previous one's output. Plain
/// closures `Fn(FormValues, &ApiClient) -> Result<FormValues>` qualify.
#[async_trait]
pub trait ValueTransform: Send + Sync {
    async fn apply(&self, values: FormValues, api: &ApiClient) -> Result<FormValues>;
}

#[async_trait]
impl<F> ValueTransform for F
where
    F: Fn(FormValues, &ApiClient) -> Result<FormValues> + Send + Sync,
{
    async fn apply(&self, values: FormValues, api: &ApiClient) -> Result<FormValues> {
        self(values, api)
    }
}

/// Callbacks around a save. Every method defaults to a no-op.
#[async_trait]
pub trait SaveHooks: Send + Sync {
    /// Sees the assembled payload last and may change it.
    async fn before_save(&self, _payload: &mut FormValues) -> Result<()> {
        Ok(())
    }

    /// Receives the saved resource, or the original when nothing changed.
    async fn on_success(&self, _saved: &Value) -> Result<()> {
        Ok(())
    }

    /// Runs after `on_success`.
    async fn after_save(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SaveHooks for NoHooks {}

/// Where saves go. [`ApiClient`] is the default.
#[async_trait]
pub trait SaveBackend: Send + Sync {
    async fn save(&self, args: Vec<SaveArg>, options: &SaveOptions) -> Result<Vec<Value>>;
}

#[async_trait]
impl SaveBackend for ApiClient {
    async fn save(&self, args: Vec<SaveArg>, options: &SaveOptions) -> Result<Vec<Value>> {
        ApiClient::save(self, args, options).await
    }
}

/// Everything a differential save needs to know about one form.
#[derive(Clone)]
pub struct SubmitConfig {
    pub resource_type: String,
    pub save_options: SaveOptions,
    pub relationship_mappings: Vec<RelationshipMapping>,
    pub diff_options: DiffOptions,
    /// Fields merged key by key instead of compared whole.
    pub managed_attribute_fields: Vec<String>,
    pub directives: ManagedAttributeDirectives,
    pub transforms: Vec<Arc<dyn ValueTransform>>,
    pub hooks: Arc<dyn SaveHooks>,
    /// Overrides the client's own `save`.
    pub backend: Option<Arc<dyn SaveBackend>>,
}

impl SubmitConfig {
    pub fn new(resource_type: impl Into<String>, save_options: SaveOptions) -> Self {
        Self {
            resource_type: resource_type.into(),
            save_options,
            relationship_mappings: Vec::new(),
            diff_options: DiffOptions::new(),
            managed_attribute_fields: vec![DEFAULT_MANAGED_FIELD.to_string()],
            directives: ManagedAttributeDirectives::new(),
            transforms: Vec::new(),
            hooks: Arc::new(NoHooks),
            backend: None,
        }
    }

    pub fn with_mapping(mut self, mapping: RelationshipMapping) -> Self {
        self.relationship_mappings.push(mapping);
        self
    }

    pub fn with_diff_options(mut self, diff_options: DiffOptions) -> Self {
        self.diff_options = diff_options;
        self
    }

    pub fn with_managed_fields(mut self, fields: Vec<String>) -> Self {
        self.managed_attribute_fields = fields;
        self
    }

    pub fn with_directives(mut self, directives: ManagedAttributeDirectives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn ValueTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SaveHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn SaveBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl fmt::Debug for SubmitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitConfig")
            .field("resource_type", &self.resource_type)
            .field("save_options", &self.save_options)
            .field("relationship_mappings", &self.relationship_mappings)
            .field("diff_options", &self.diff_options)
            .field("managed_attribute_fields", &self.managed_attribute_fields)
            .field("directives", &self.directives)
            .field("transforms", &self.transforms.len())
            .field("backend", &self.backend.is_some())
            .finish()
    }
}
