//! # Tandem Engine
//!
//! The pure core of a JSON:API data-access layer.
//!
//! This crate decides *what* to send to a multi-service JSON:API backend; the
//! `tandem-client` crate decides *how* and actually sends it.
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here touches the network or awaits
//! - **Deterministic**: same inputs, same payloads
//! - **Testable**: plain values in, plain values out
//!
//! ## Core Concepts
//!
//! ### Resources and operations
//!
//! A [`Resource`] is the JSON:API wire shape; [`FormValues`] is the flat shape
//! forms work with. Every CRUD intent is one [`Operation`], answered by one
//! [`OperationResult`] at the same index.
//!
//! ### Error aggregation
//!
//! A batch succeeds or fails as a whole. [`aggregate_errors`] folds failed
//! results into one [`OperationsError`] with a form-level message, a field map
//! and a per-operation breakdown.
//!
//! ### Differential save
//!
//! Saving an edited record sends only what changed:
//! - [`RelationshipMapping`] turns flat fields into relationship documents
//! - [`diff_attributes`] and [`diff_relationships`] compute the minimal diff
//! - [`merge_managed_attributes`] resolves extensible key-value maps through
//!   an ordered precedence chain
//! - [`partition_children`] plans writes for nested child resources
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_engine::{diff_attributes, DiffOptions, FormValues};
//! use serde_json::json;
//!
//! let original: FormValues = json!({"id": "5", "type": "person", "name": "John", "email": "a@x.com"})
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//! let submitted: FormValues = json!({"name": "John", "email": "b@x.com"})
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//!
//! let diff = diff_attributes(&submitted, Some(&original), &DiffOptions::new(), &[]);
//! assert_eq!(diff.len(), 1);
//! assert_eq!(diff["email"], "b@x.com");
//! ```

pub mod aggregate;
pub mod diff;
pub mod error;
pub mod managed;
pub mod nested;
pub mod operation;
pub mod relationship;
pub mod resource;

// Re-export main types at crate root
pub use aggregate::{
    aggregate_errors, error_messages, form_error_lines, remap_missing, ErrorSummary, FieldErrors,
    OperationError, OperationsError,
};
pub use diff::{diff_attributes, diff_relationships, DiffOptions, KeyTransform, RESERVED_KEYS};
pub use error::{Error, Result};
pub use managed::{
    merge_managed_attributes, ClearStyle, ManagedAttributeDirectives, Resolution,
    DEFAULT_MANAGED_FIELD,
};
pub use nested::{partition_children, NestedPlan};
pub use operation::{ApiError, ErrorSource, Method, Operation, OperationResult};
pub use relationship::{
    extract_relationships, original_relationships, CustomConverter, ModifiedCheck, NestedResource,
    RelationshipMapping, RelationshipType,
};
pub use resource::{
    id_of, FormValues, Ref, RelationshipData, RelationshipDocument, Relationships, Resource,
};

/// Type aliases for clarity
pub type ResourceId = String;
pub type ResourceType = String;
