//! Operation types for the batched-mutation protocol.
//!
//! Every logical CRUD intent is one [`Operation`]. A batch of operations is
//! answered by one [`OperationResult`] per operation, at the same index.

use crate::{Error, Resource, ResourceId, ResourceType, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// HTTP verb of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an operations batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op: Method,
    /// Path relative to the backend's base URL, e.g. `person/5`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Resource>,
}

impl Operation {
    /// Find-by-path.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            op: Method::Get,
            path: path.into(),
            value: None,
        }
    }

    /// Create a resource. The path is the resource type.
    pub fn post(resource: Resource) -> Self {
        Self {
            op: Method::Post,
            path: resource.resource_type.clone(),
            value: Some(resource),
        }
    }

    /// Update a persisted resource at `type/id`.
    pub fn patch(resource: Resource) -> Result<Self> {
        let id = resource.id.clone().ok_or_else(|| {
            Error::InvalidResource(format!(
                "cannot PATCH a '{}' without an id",
                resource.resource_type
            ))
        })?;
        Ok(Self {
            op: Method::Patch,
            path: format!("{}/{}", resource.resource_type, id),
            value: Some(resource),
        })
    }

    /// Delete `type/id`.
    pub fn delete(resource_type: impl Into<ResourceType>, id: impl Into<ResourceId>) -> Self {
        Self {
            op: Method::Delete,
            path: format!("{}/{}", resource_type.into(), id.into()),
            value: None,
        }
    }

    /// The resource type this operation targets: the value's type, or else
    /// the first path segment.
    pub fn resource_type(&self) -> Result<&str> {
        if let Some(value) = &self.value {
            return Ok(&value.resource_type);
        }
        self.path
            .split('/')
            .find(|segment| !segment.is_empty())
            .ok_or_else(|| Error::InvalidPath(self.path.clone()))
    }
}

/// Where an error applies inside the submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// A JSON:API error object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl ApiError {
    /// Form-level error with a title and detail.
    pub fn new(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Field-level error attached to `pointer`.
    pub fn at_pointer(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            source: Some(ErrorSource {
                pointer: Some(pointer.into()),
                parameter: None,
            }),
            ..Default::default()
        }
    }

    /// The field pointer, if this is an attribute-level error.
    pub fn pointer(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.pointer.as_deref())
            .filter(|p| !p.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Value>>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ApiError>>,
}

impl OperationResult {
    /// A successful result carrying `data`.
    pub fn success(status: u16, data: Option<Value>) -> Self {
        Self {
            data,
            included: None,
            status,
            errors: None,
        }
    }

    /// A failed result carrying error objects.
    pub fn failure(status: u16, errors: Vec<ApiError>) -> Self {
        Self {
            data: None,
            included: None,
            status,
            errors: Some(errors),
        }
    }

    /// The tolerated-absence result: `{data: null, status: 404}`.
    pub fn missing() -> Self {
        Self::success(404, None)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 404 Not Found or 410 Gone.
    pub fn is_missing(&self) -> bool {
        matches!(self.status, 404 | 410)
    }
}
