//! Unified error handling for the client.

use crate::config::ConfigError;
use serde_json::Value;
use tandem_engine::{form_error_lines, ApiError, OperationsError};

/// Client error type.
///
/// `Clone` so that one failed batch can be handed to every coalesced caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The backend cancelled the batch transaction.
    #[error(transparent)]
    Operations(#[from] OperationsError),

    /// The backend answered with a status we do not turn into results.
    #[error("{message}")]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
        errors: Vec<ApiError>,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Engine error: {0}")]
    Engine(#[from] tandem_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A transform or hook failed. The client never raises this itself;
    /// [`ValueTransform`](crate::ValueTransform) and
    /// [`SaveHooks`](crate::SaveHooks) implementations return it to abort a
    /// save with a message for the user.
    #[error("{0}")]
    Hook(String),

    #[error("request was dropped before it completed")]
    Dropped,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl Error {
    /// Build a readable error for a failed HTTP response.
    ///
    /// `"{url}: {status_text}"`, prefixed with `Service unavailable:` for 502
    /// and followed by any JSON:API error lines found in the body.
    pub fn transport(url: &str, status: u16, status_text: &str, body: Option<&Value>) -> Self {
        let mut message = format!("{url}: {status_text}");
        if status == 502 {
            message = format!("Service unavailable:\n{message}");
        }

        let errors: Vec<ApiError> = body
            .and_then(|b| b.get("errors"))
            .cloned()
            .and_then(|e| serde_json::from_value(e).ok())
            .unwrap_or_default();
        if let Some(lines) = form_error_lines(&errors) {
            message.push('\n');
            message.push_str(&lines);
        }

        Error::Transport {
            url: url.to_string(),
            status: Some(status),
            message,
            errors,
        }
    }

    /// The HTTP status, for transport errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Error objects returned with a transport error.
    pub fn api_errors(&self) -> &[ApiError] {
        match self {
            Error::Transport { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn readable_transport_error() {
        let err = Error::transport("/agent-api/person/1", 404, "Not Found", None);
        assert_eq!(err.to_string(), "/agent-api/person/1: Not Found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn bad_gateway_is_service_unavailable() {
        let err = Error::transport("/collection-api/operations", 502, "Bad Gateway", None);
        assert_eq!(
            err.to_string(),
            "Service unavailable:\n/collection-api/operations: Bad Gateway"
        );
    }

    #[test]
    fn json_api_errors_are_appended() {
        let body = json!({
            "errors": [
                {"status": "400", "title": "Bad Request", "detail": "name is required"},
                {"status": "400", "detail": "too long", "source": {"pointer": "name"}}
            ]
        });
        let err = Error::transport("/seqdb-api/pcr-primer", 400, "Bad Request", Some(&body));
        assert_eq!(
            err.to_string(),
            "/seqdb-api/pcr-primer: Bad Request\nBad Request: name is required"
        );
        assert_eq!(err.api_errors().len(), 2);
    }
}
