//! Cross-service joins.
//!
//! Resources from one service often hold the id of a resource that lives in
//! another. A [`JoinSpec`] says how to find it; a [`ClientSideJoiner`]
//! fetches the targets in one batch and writes them onto the resources.

use crate::client::BulkGetOptions;
use crate::coalesce::Coalescer;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Anything that can fetch resources by path in bulk.
#[async_trait]
pub trait BulkFetcher: Send + Sync {
    async fn bulk_get(&self, paths: &[String], options: &BulkGetOptions) -> Result<Vec<Value>>;
}

/// Builds the fetch path for one resource.
pub type JoinPath = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// How to resolve one foreign-key-style field.
#[derive(Clone)]
pub struct JoinSpec {
    /// Only resources where this field is truthy are joined.
    pub id_field: String,
    /// Receives the fetched resource.
    pub join_field: String,
    pub path: JoinPath,
    pub api_base_url: Option<String>,
}

impl JoinSpec {
    pub fn new(id_field: impl Into<String>, join_field: impl Into<String>, path: JoinPath) -> Self {
        Self {
            id_field: id_field.into(),
            join_field: join_field.into(),
            path,
            api_base_url: None,
        }
    }

    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(api_base_url.into());
        self
    }
}

impl fmt::Debug for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpec")
            .field("id_field", &self.id_field)
            .field("join_field", &self.join_field)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// Resolves one [`JoinSpec`] over a set of resources.
///
/// Each joiner owns its coalescing scope; joiners never share state.
pub struct ClientSideJoiner<'a> {
    fetcher: &'a dyn BulkFetcher,
    resources: &'a mut [Value],
    spec: &'a JoinSpec,
    coalescer: Coalescer<String, Value>,
}

impl<'a> ClientSideJoiner<'a> {
    pub fn new(fetcher: &'a dyn BulkFetcher, resources: &'a mut [Value], spec: &'a JoinSpec) -> Self {
        Self {
            fetcher,
            resources,
            spec,
            coalescer: Coalescer::new(),
        }
    }

    /// Fetch the joined resources and write them into `join_field`.
    ///
    /// Missing targets are written as null. A transport failure fails the
    /// whole join and leaves the resources untouched.
    pub async fn join(self) -> Result<()> {
        let targets: Vec<(usize, String)> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, resource)| truthy(resource.get(&self.spec.id_field)))
            .map(|(index, resource)| (index, (self.spec.path)(resource)))
            .collect();

        if targets.is_empty() {
            return Ok(());
        }

        let options = BulkGetOptions {
            api_base_url: self.spec.api_base_url.clone().unwrap_or_default(),
            join_specs: Vec::new(),
            return_null_for_missing_resource: true,
        };
        let paths: Vec<String> = targets.iter().map(|(_, path)| path.clone()).collect();

        tracing::debug!(
            join_field = %self.spec.join_field,
            resources = targets.len(),
            "Resolving join"
        );

        let fetcher = self.fetcher;
        let options = &options;
        let joined = self
            .coalescer
            .load_many(paths, move |unique: Vec<String>| async move {
                fetcher.bulk_get(&unique, options).await
            })
            .await?;

        for ((index, _), value) in targets.into_iter().zip(joined) {
            if let Some(resource) = self.resources[index].as_object_mut() {
                resource.insert(self.spec.join_field.clone(), value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl BulkFetcher for RecordingFetcher {
        async fn bulk_get(&self, paths: &[String], options: &BulkGetOptions) -> Result<Vec<Value>> {
            assert!(options.return_null_for_missing_resource);
            self.calls
                .lock()
                .unwrap()
                .push((paths.to_vec(), options.api_base_url.clone()));
            Ok(paths
                .iter()
                .map(|p| match p.as_str() {
                    "person/missing" => Value::Null,
                    _ => json!({"id": p.trim_start_matches("person/"), "type": "person"}),
                })
                .collect())
        }
    }

    fn person_join() -> JoinSpec {
        JoinSpec::new(
            "personId",
            "person",
            Arc::new(|r: &Value| format!("person/{}", r["personId"].as_str().unwrap_or_default())),
        )
        .with_api_base_url("/agent-api")
    }

    #[tokio::test]
    async fn joins_by_position_and_deduplicates() {
        let fetcher = RecordingFetcher::default();
        let spec = person_join();
        let mut resources = vec![
            json!({"id": "a", "personId": "1"}),
            json!({"id": "b", "personId": null}),
            json!({"id": "c", "personId": "1"}),
            json!({"id": "d", "personId": "missing"}),
        ];

        ClientSideJoiner::new(&fetcher, &mut resources, &spec)
            .join()
            .await
            .unwrap();

        assert_eq!(resources[0]["person"], json!({"id": "1", "type": "person"}));
        assert!(resources[1].get("person").is_none());
        assert_eq!(resources[2]["person"], json!({"id": "1", "type": "person"}));
        assert_eq!(resources[3]["person"], Value::Null);

        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["person/1", "person/missing"]);
        assert_eq!(calls[0].1, "/agent-api");
    }

    #[tokio::test]
    async fn nothing_to_join_makes_no_call() {
        let fetcher = RecordingFetcher::default();
        let spec = person_join();
        let mut resources = vec![json!({"id": "a"}), json!({"id": "b", "personId": ""})];

        ClientSideJoiner::new(&fetcher, &mut resources, &spec)
            .join()
            .await
            .unwrap();

        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn truthiness() {
        assert!(truthy(Some(&json!("x"))));
        assert!(truthy(Some(&json!(7))));
        assert!(truthy(Some(&json!({}))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(None));
    }
}
