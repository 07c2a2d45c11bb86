//! Error aggregation over operation results.
//!
//! A batch is one transaction: a single failed result means the server
//! cancelled all of it. Failed results are folded into one
//! [`OperationsError`] carrying a form-level message, a field-level map and
//! the per-operation breakdown.

use crate::{ApiError, OperationResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Field pointer to message.
pub type FieldErrors = BTreeMap<String, String>;

/// Errors of one failed operation, at its position in the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    pub index: usize,
    pub error_message: Option<String>,
    pub field_errors: FieldErrors,
}

/// The transaction-cancelled error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct OperationsError {
    pub message: String,
    pub field_errors: FieldErrors,
    pub individual_errors: Vec<OperationError>,
}

impl OperationsError {
    /// A form-level error not tied to any particular operation.
    pub fn form(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            individual_errors: vec![OperationError {
                index: 0,
                error_message: Some(message.clone()),
                field_errors: FieldErrors::new(),
            }],
            message,
            field_errors: FieldErrors::new(),
        }
    }
}

/// Everything extracted from a result list, whether or not it amounts to a
/// thrown error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorSummary {
    pub error_message: Option<String>,
    pub field_errors: FieldErrors,
    pub individual_errors: Vec<OperationError>,
}

/// Join the form-level (pointer-less) errors as `title: detail` lines.
///
/// A blank title or detail is dropped together with its separator.
pub fn form_error_lines(errors: &[ApiError]) -> Option<String> {
    let lines: Vec<String> = errors
        .iter()
        .filter(|e| e.pointer().is_none())
        .map(|e| {
            [e.title.as_deref(), e.detail.as_deref()]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join(": ")
        })
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn field_error_map(errors: &[ApiError]) -> FieldErrors {
    errors
        .iter()
        .filter_map(|e| Some((e.pointer()?.to_string(), e.detail.clone()?)))
        .collect()
}

/// Summarize every non-2xx result.
pub fn error_messages(results: &[OperationResult]) -> ErrorSummary {
    let individual_errors: Vec<OperationError> = results
        .iter()
        .enumerate()
        .filter(|(_, result)| !result.is_success())
        .map(|(index, result)| {
            // Results without an `errors` member contribute no messages.
            let errors = result.errors.as_deref().unwrap_or_default();
            OperationError {
                index,
                error_message: form_error_lines(errors),
                field_errors: field_error_map(errors),
            }
        })
        .collect();

    let messages: Vec<&str> = individual_errors
        .iter()
        .filter_map(|e| e.error_message.as_deref())
        .collect();
    let error_message = if messages.is_empty() {
        None
    } else {
        Some(messages.join("\n"))
    };

    let mut field_errors = FieldErrors::new();
    for individual in &individual_errors {
        field_errors.extend(individual.field_errors.clone());
    }

    ErrorSummary {
        error_message,
        field_errors,
        individual_errors,
    }
}

/// The error to raise for `results`, if any.
///
/// Raised when there is a form-level message or at least one field error.
pub fn aggregate_errors(results: &[OperationResult]) -> Option<OperationsError> {
    let summary = error_messages(results);
    if summary.error_message.is_none() && summary.field_errors.is_empty() {
        return None;
    }
    Some(OperationsError {
        message: summary.error_message.unwrap_or_default(),
        field_errors: summary.field_errors,
        individual_errors: summary.individual_errors,
    })
}

/// Rewrite every 404/410 result to `{data: null, status: 404}`.
///
/// Returns how many results were rewritten.
pub fn remap_missing(results: &mut [OperationResult]) -> usize {
    let mut remapped = 0;
    for result in results.iter_mut().filter(|r| r.is_missing()) {
        *result = OperationResult::missing();
        remapped += 1;
    }
    remapped
}
