//! HTTP transport seam.
//!
//! Everything above this module speaks [`HttpRequest`] / [`HttpResponse`].
//! Non-2xx statuses come back as responses, never as errors; only
//! connection-level failures are [`Error::Http`].

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tandem_engine::Method;

/// Content type of the operations endpoint.
pub const JSON_PATCH: &str = "application/json-patch+json";
/// Content type of plain JSON:API requests.
pub const JSON_API: &str = "application/vnd.api+json";
/// Content type of the bulk extension.
pub const JSON_API_BULK: &str = "application/vnd.api+json; ext=bulk";

/// One outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub content_type: String,
    pub accept: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            content_type: JSON_API.to_string(),
            accept: JSON_API.to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Set both `Content-Type` and `Accept`.
    pub fn with_media_type(mut self, media_type: &str) -> Self {
        self.content_type = media_type.to_string();
        self.accept = media_type.to_string();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Cache key: method, url and query parameters.
    pub fn cache_key(&self) -> String {
        let query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{} {}?{}", self.method, self.url, query.join("&"))
    }
}

/// One HTTP response. `body` is `None` when the response had no JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Option<Value>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A member of the JSON body (`data`, `included`, `errors`).
    pub fn member(&self, key: &str) -> Option<&Value> {
        self.body.as_ref().and_then(|b| b.get(key))
    }

    /// Turn a failed response into a readable [`Error::Transport`].
    pub fn into_error(self, url: &str) -> Error {
        Error::transport(url, self.status, &self.status_text, self.body.as_ref())
    }
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Sends requests to the backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] over a `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Crnk-Compact", reqwest::header::HeaderValue::from_static("true"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::CONTENT_TYPE, &request.content_type)
            .header(reqwest::header::ACCEPT, &request.accept);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        tracing::debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let body = if bytes.is_empty() {
            None
        } else if status.is_success() {
            Some(serde_json::from_slice(&bytes)?)
        } else {
            // Gateways answer with HTML; keep the status, drop the body.
            serde_json::from_slice(&bytes).ok()
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_includes_method_and_query() {
        let a = HttpRequest::new(Method::Get, "/agent-api/person").with_query("include", "organizations");
        let b = HttpRequest::new(Method::Get, "/agent-api/person");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "GET /agent-api/person?include=organizations");
    }

    #[test]
    fn response_helpers() {
        let ok = HttpResponse::new(200, Some(json!({"data": {"id": "1"}})));
        assert!(ok.is_success());
        assert_eq!(ok.status_text, "OK");
        assert_eq!(ok.member("data"), Some(&json!({"id": "1"})));

        let gone = HttpResponse::new(502, None);
        assert_eq!(
            gone.into_error("/x").to_string(),
            "Service unavailable:\n/x: Bad Gateway"
        );
    }
}
