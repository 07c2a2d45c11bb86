//! Per-backend routing of operation batches.
//!
//! A [`BackendRoutingPolicy`] turns a batch into one or more HTTP calls and
//! turns the responses back into one [`OperationResult`] per operation, in
//! submission order. The [`RoutingTable`] picks the policy for a backend.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{HttpRequest, HttpResponse, JSON_API, JSON_API_BULK, JSON_PATCH};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tandem_engine::{ApiError, Method, Operation, OperationResult};

/// One HTTP call and the batch positions it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportCall {
    pub request: HttpRequest,
    pub indices: Vec<usize>,
}

/// How one backend speaks the batch protocol.
pub trait BackendRoutingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this policy can carry `operations`.
    fn accepts(&self, _operations: &[Operation]) -> bool {
        true
    }

    /// Build the HTTP calls for `operations` against `base_url`.
    fn translate(&self, base_url: &str, operations: &[Operation]) -> Result<Vec<TransportCall>>;

    /// Map the responses back to one result per operation.
    fn normalize(
        &self,
        operations: &[Operation],
        responses: Vec<(TransportCall, HttpResponse)>,
    ) -> Result<Vec<OperationResult>>;
}

/// `PATCH {base}/operations` with the whole batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperationsEndpoint;

impl BackendRoutingPolicy for OperationsEndpoint {
    fn name(&self) -> &'static str {
        "operations"
    }

    fn translate(&self, base_url: &str, operations: &[Operation]) -> Result<Vec<TransportCall>> {
        let request = HttpRequest::new(Method::Patch, format!("{base_url}/operations"))
            .with_media_type(JSON_PATCH)
            .with_body(serde_json::to_value(operations)?);
        Ok(vec![TransportCall {
            request,
            indices: (0..operations.len()).collect(),
        }])
    }

    fn normalize(
        &self,
        operations: &[Operation],
        responses: Vec<(TransportCall, HttpResponse)>,
    ) -> Result<Vec<OperationResult>> {
        let (call, response) = single_response(responses)?;
        if !response.is_success() {
            return Err(response.into_error(&call.request.url));
        }

        let body = response
            .body
            .ok_or_else(|| Error::Decode("operations response has no body".into()))?;
        let results: Vec<OperationResult> = serde_json::from_value(body)?;
        if results.len() != operations.len() {
            return Err(Error::Decode(format!(
                "expected {} operation results, got {}",
                operations.len(),
                results.len()
            )));
        }
        Ok(results)
    }
}

/// One operation sent as a plain JSON:API request to `{base}/{path}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleRequest;

impl BackendRoutingPolicy for SingleRequest {
    fn name(&self) -> &'static str {
        "single-request"
    }

    fn accepts(&self, operations: &[Operation]) -> bool {
        operations.len() == 1
    }

    fn translate(&self, base_url: &str, operations: &[Operation]) -> Result<Vec<TransportCall>> {
        let [operation] = operations else {
            return Err(Error::UnsupportedOperation(format!(
                "single request needs exactly one operation, got {}",
                operations.len()
            )));
        };

        let mut request = HttpRequest::new(operation.op, format!("{base_url}/{}", operation.path));
        if matches!(operation.op, Method::Post | Method::Patch) {
            request = request.with_body(json!({ "data": operation.value }));
        }
        Ok(vec![TransportCall {
            request,
            indices: vec![0],
        }])
    }

    fn normalize(
        &self,
        operations: &[Operation],
        responses: Vec<(TransportCall, HttpResponse)>,
    ) -> Result<Vec<OperationResult>> {
        let (call, response) = single_response(responses)?;
        let op = operations.first().map(|o| o.op);

        if response.is_success() {
            // DELETE responses only carry a status.
            let result = if op == Some(Method::Delete) {
                OperationResult::success(response.status, None)
            } else {
                OperationResult {
                    data: response.member("data").cloned(),
                    included: response
                        .member("included")
                        .and_then(Value::as_array)
                        .cloned(),
                    status: response.status,
                    errors: None,
                }
            };
            return Ok(vec![result]);
        }

        let mut errors: Vec<ApiError> = response
            .member("errors")
            .cloned()
            .and_then(|e| serde_json::from_value(e).ok())
            .unwrap_or_default();

        if errors.is_empty() && matches!(response.status, 404 | 410) {
            errors.push(ApiError {
                status: Some(response.status.to_string()),
                ..ApiError::new(response.status_text.clone(), call.request.url.clone())
            });
        }
        if errors.is_empty() {
            return Err(response.into_error(&call.request.url));
        }
        Ok(vec![OperationResult::failure(response.status, errors)])
    }
}

/// The bulk extension: POST/PATCH `{base}/{type}/bulk`, one call per verb
/// and resource type.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkExtension;

impl BackendRoutingPolicy for BulkExtension {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn accepts(&self, operations: &[Operation]) -> bool {
        !operations.is_empty()
            && operations
                .iter()
                .all(|o| matches!(o.op, Method::Post | Method::Patch) && o.value.is_some())
    }

    fn translate(&self, base_url: &str, operations: &[Operation]) -> Result<Vec<TransportCall>> {
        let mut groups: Vec<(Method, String, Vec<usize>)> = Vec::new();
        for (index, operation) in operations.iter().enumerate() {
            let resource_type = operation.resource_type()?;
            match groups
                .iter()
                .position(|(op, ty, _)| *op == operation.op && ty == resource_type)
            {
                Some(group) => groups[group].2.push(index),
                None => groups.push((operation.op, resource_type.to_string(), vec![index])),
            }
        }

        groups
            .into_iter()
            .map(|(op, resource_type, indices)| -> Result<TransportCall> {
                let data: Vec<Value> = indices
                    .iter()
                    .map(|&i| serde_json::to_value(&operations[i].value))
                    .collect::<std::result::Result<_, _>>()?;
                let request = HttpRequest::new(op, format!("{base_url}/{resource_type}/bulk"))
                    .with_media_type(JSON_API_BULK)
                    .with_body(json!({ "data": data }));
                Ok(TransportCall { request, indices })
            })
            .collect()
    }

    fn normalize(
        &self,
        operations: &[Operation],
        responses: Vec<(TransportCall, HttpResponse)>,
    ) -> Result<Vec<OperationResult>> {
        let mut results: Vec<Option<OperationResult>> = vec![None; operations.len()];

        for (call, response) in responses {
            if !response.is_success() {
                return Err(response.into_error(&call.request.url));
            }
            let data = response
                .member("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if data.len() != call.indices.len() {
                return Err(Error::Decode(format!(
                    "{}: expected {} resources, got {}",
                    call.request.url,
                    call.indices.len(),
                    data.len()
                )));
            }
            for (&index, item) in call.indices.iter().zip(data) {
                results[index] = Some(OperationResult {
                    data: Some(item),
                    included: Some(Vec::new()),
                    status: response.status,
                    errors: None,
                });
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.ok_or_else(|| Error::Decode(format!("no bulk result for operation {i}"))))
            .collect()
    }
}

fn single_response(
    mut responses: Vec<(TransportCall, HttpResponse)>,
) -> Result<(TransportCall, HttpResponse)> {
    match responses.len() {
        1 => responses.pop().ok_or(Error::Dropped),
        n => Err(Error::Decode(format!("expected one response, got {n}"))),
    }
}

/// Routing policies keyed by backend (`api_base_url`).
#[derive(Clone)]
pub struct RoutingTable {
    policies: HashMap<String, Arc<dyn BackendRoutingPolicy>>,
    default: Arc<dyn BackendRoutingPolicy>,
    single: Arc<dyn BackendRoutingPolicy>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            policies: HashMap::new(),
            default: Arc::new(OperationsEndpoint),
            single: Arc::new(SingleRequest),
        }
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bulk extension for every backend listed in `config.bulk_backends`.
    pub fn from_config(config: &Config) -> Self {
        let mut table = Self::new();
        for backend in &config.bulk_backends {
            table.register(backend.clone(), Arc::new(BulkExtension));
        }
        table
    }

    pub fn register(&mut self, backend: impl Into<String>, policy: Arc<dyn BackendRoutingPolicy>) {
        self.policies.insert(backend.into(), policy);
    }

    /// The policy for a batch.
    ///
    /// The single-request shortcut wins when asked for; then the backend's
    /// own policy if it accepts the batch; then the operations endpoint.
    pub fn select(
        &self,
        api_base_url: &str,
        operations: &[Operation],
        single_request: bool,
    ) -> Arc<dyn BackendRoutingPolicy> {
        let policy = if single_request && self.single.accepts(operations) {
            self.single.clone()
        } else {
            match self.policies.get(api_base_url) {
                Some(policy) if policy.accepts(operations) => policy.clone(),
                _ => self.default.clone(),
            }
        };
        tracing::info!(
            backend = %api_base_url,
            policy = policy.name(),
            operations = operations.len(),
            "Routing batch"
        );
        policy
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<(&String, &'static str)> =
            self.policies.iter().map(|(k, v)| (k, v.name())).collect();
        backends.sort();
        f.debug_struct("RoutingTable")
            .field("policies", &backends)
            .field("default", &self.default.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_engine::Resource;

    fn todo(id: &str) -> Resource {
        Resource::new("todo").with_id(id)
    }

    #[test]
    fn operations_endpoint_sends_one_patch() {
        let ops = vec![Operation::get("todo/1"), Operation::delete("todo", "2")];
        let calls = OperationsEndpoint.translate("/api/todo-api", &ops).unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.method, Method::Patch);
        assert_eq!(calls[0].request.url, "/api/todo-api/operations");
        assert_eq!(calls[0].request.content_type, JSON_PATCH);
        assert_eq!(calls[0].indices, vec![0, 1]);
    }

    #[test]
    fn operations_endpoint_rejects_mismatched_result_count() {
        let ops = vec![Operation::get("todo/1"), Operation::get("todo/2")];
        let call = OperationsEndpoint.translate("", &ops).unwrap().remove(0);
        let response = HttpResponse::new(200, Some(json!([{"status": 200}])));

        let err = OperationsEndpoint.normalize(&ops, vec![(call, response)]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn single_request_wraps_body_and_result() {
        let ops = vec![Operation::post(todo("tmp"))];
        let call = SingleRequest.translate("/api/todo-api", &ops).unwrap().remove(0);
        assert_eq!(call.request.url, "/api/todo-api/todo");
        assert_eq!(call.request.content_type, JSON_API);
        assert_eq!(call.request.body.as_ref().unwrap()["data"]["type"], "todo");

        let response = HttpResponse::new(201, Some(json!({"data": {"id": "1", "type": "todo"}})));
        let results = SingleRequest.normalize(&ops, vec![(call, response)]).unwrap();
        assert_eq!(results[0].status, 201);
        assert_eq!(results[0].data.as_ref().unwrap()["id"], "1");
    }

    #[test]
    fn single_delete_carries_status_only() {
        let ops = vec![Operation::delete("todo", "1")];
        let call = SingleRequest.translate("", &ops).unwrap().remove(0);
        assert!(call.request.body.is_none());

        let response = HttpResponse::new(204, None);
        let results = SingleRequest.normalize(&ops, vec![(call, response)]).unwrap();
        assert_eq!(results, vec![OperationResult::success(204, None)]);
    }

    #[test]
    fn single_request_failures() {
        let ops = vec![Operation::get("todo/9")];
        let call = SingleRequest.translate("", &ops).unwrap().remove(0);

        let missing = SingleRequest
            .normalize(&ops, vec![(call.clone(), HttpResponse::new(404, None))])
            .unwrap();
        assert!(missing[0].is_missing());

        let invalid = HttpResponse::new(
            422,
            Some(json!({"errors": [{"title": "Constraint violation", "detail": "bad"}]})),
        );
        let results = SingleRequest.normalize(&ops, vec![(call.clone(), invalid)]).unwrap();
        assert_eq!(results[0].errors.as_ref().unwrap().len(), 1);

        let err = SingleRequest
            .normalize(&ops, vec![(call, HttpResponse::new(502, None))])
            .unwrap_err();
        assert_eq!(err.to_string(), "Service unavailable:\n/todo/9: Bad Gateway");
    }

    #[test]
    fn bulk_groups_by_verb_and_type() {
        let ops = vec![
            Operation::post(Resource::new("person").with_id("t1")),
            Operation::patch(Resource::new("person").with_id("5")).unwrap(),
            Operation::post(Resource::new("person").with_id("t2")),
            Operation::post(Resource::new("organization").with_id("t3")),
        ];
        assert!(BulkExtension.accepts(&ops));

        let calls = BulkExtension.translate("/api/agent-api", &ops).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].request.url, "/api/agent-api/person/bulk");
        assert_eq!(calls[0].request.method, Method::Post);
        assert_eq!(calls[0].indices, vec![0, 2]);
        assert_eq!(calls[1].request.method, Method::Patch);
        assert_eq!(calls[1].indices, vec![1]);
        assert_eq!(calls[2].request.url, "/api/agent-api/organization/bulk");
        assert_eq!(calls[0].request.content_type, JSON_API_BULK);
    }

    #[test]
    fn bulk_results_return_in_submission_order() {
        let ops = vec![
            Operation::post(Resource::new("person").with_id("t1")),
            Operation::patch(Resource::new("person").with_id("5")).unwrap(),
            Operation::post(Resource::new("person").with_id("t2")),
        ];
        let calls = BulkExtension.translate("", &ops).unwrap();
        let responses = vec![
            (
                calls[0].clone(),
                HttpResponse::new(201, Some(json!({"data": [{"id": "a"}, {"id": "b"}]}))),
            ),
            (
                calls[1].clone(),
                HttpResponse::new(200, Some(json!({"data": [{"id": "5"}]}))),
            ),
        ];

        let results = BulkExtension.normalize(&ops, responses).unwrap();
        let ids: Vec<&Value> = results.iter().map(|r| &r.data.as_ref().unwrap()["id"]).collect();
        assert_eq!(ids, vec!["a", "5", "b"]);
        assert_eq!(results[0].included, Some(Vec::new()));
        assert_eq!(results[1].status, 200);
    }

    #[test]
    fn bulk_does_not_carry_reads_or_deletes() {
        assert!(!BulkExtension.accepts(&[Operation::get("person/1")]));
        assert!(!BulkExtension.accepts(&[
            Operation::post(Resource::new("person")),
            Operation::delete("person", "1"),
        ]));
        assert!(!BulkExtension.accepts(&[]));
    }

    #[test]
    fn table_selection() {
        let table = RoutingTable::from_config(&Config::default());
        let writes = vec![Operation::post(Resource::new("person"))];
        let reads = vec![Operation::get("person/1"), Operation::get("person/2")];

        assert_eq!(table.select("/agent-api", &writes, false).name(), "bulk");
        assert_eq!(table.select("/agent-api", &reads, false).name(), "operations");
        assert_eq!(table.select("/collection-api", &writes, false).name(), "operations");
        assert_eq!(table.select("/agent-api", &writes, true).name(), "single-request");
        // Two operations never take the single-request shortcut.
        assert_eq!(table.select("/collection-api", &reads, true).name(), "operations");
    }
}
