//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tandem_client::{
    ApiClient, Config, Error, HttpRequest, HttpResponse, Result, SaveArg, SaveBackend, SaveOptions,
    Transport,
};
use tandem_engine::{FormValues, Method};
use tracing_subscriber::EnvFilter;

pub const BASE_URL: &str = "http://api.test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tandem_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn form(value: Value) -> FormValues {
    value.as_object().cloned().expect("fixture must be an object")
}

type Responder = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Records every request and answers from a script.
pub struct MockTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responder: Responder,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    /// Answers the operations endpoint by echoing each operation back.
    pub fn echo() -> Arc<Self> {
        Self::new(|request| match request.body.as_ref().and_then(Value::as_array) {
            Some(operations) if request.url.ends_with("/operations") => {
                HttpResponse::new(200, Some(Value::Array(operations.iter().map(echo_result).collect())))
            }
            _ => HttpResponse::new(404, None),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        // Give concurrent callers a chance to run, as a real network would.
        tokio::task::yield_now().await;
        Ok((self.responder)(&request))
    }
}

/// A transport whose every request fails before reaching a backend.
#[derive(Default)]
pub struct Unreachable {
    attempts: AtomicUsize,
}

impl Unreachable {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Unreachable {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Http("connection refused".into()))
    }
}

/// The result a well-behaved backend gives for one operation.
pub fn echo_result(operation: &Value) -> Value {
    let path = operation["path"].as_str().unwrap_or_default();
    match operation["op"].as_str() {
        Some("GET") => {
            let (resource_type, id) = path.split_once('/').unwrap_or((path, ""));
            json!({"status": 200, "data": {"id": id, "type": resource_type}})
        }
        Some("POST") => json!({"status": 201, "data": operation["value"]}),
        Some("PATCH") => json!({"status": 200, "data": operation["value"]}),
        _ => json!({"status": 204}),
    }
}

pub fn config() -> Config {
    Config::default()
        .with_base_url(BASE_URL)
        .with_bulk_backends(Vec::new())
}

/// A client over `transport` with sequential temporary ids.
pub fn client(transport: Arc<MockTransport>, config: Config) -> ApiClient {
    let counter = Arc::new(AtomicUsize::new(0));
    ApiClient::builder(config)
        .transport(transport)
        .id_generator(Arc::new(move || {
            format!("new-{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
        }))
        .build()
        .expect("client builds")
}

pub fn is(request: &HttpRequest, method: Method, path: &str) -> bool {
    request.method == method && request.url == format!("{BASE_URL}{path}")
}

/// A save backend that records its calls and echoes resources back with
/// generated ids.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(Vec<SaveArg>, SaveOptions)>>,
    next_id: AtomicUsize,
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<(Vec<SaveArg>, SaveOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SaveBackend for RecordingBackend {
    async fn save(&self, args: Vec<SaveArg>, options: &SaveOptions) -> Result<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .push((args.clone(), options.clone()));
        Ok(args
            .into_iter()
            .map(|arg| match arg {
                SaveArg::Save {
                    mut resource,
                    resource_type,
                } => {
                    if !resource.contains_key("id") {
                        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 100;
                        resource.insert("id".into(), json!(id.to_string()));
                    }
                    resource.insert("type".into(), json!(resource_type));
                    Value::Object(resource)
                }
                SaveArg::Delete { .. } => Value::Null,
            })
            .collect())
    }
}
