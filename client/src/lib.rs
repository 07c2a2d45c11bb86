//! # Tandem Client
//!
//! Talks to a JSON:API backend made of several independently deployed
//! services, using as few round trips as it can.
//!
//! ## Overview
//!
//! - [`ApiClient::submit`] sends a batch of operations through the
//!   operations endpoint, a single plain request, or a service's bulk
//!   extension, chosen per backend by the [`RoutingTable`]
//! - [`ApiClient::bulk_get`] and [`ApiClient::bulk_load_resources`] read many
//!   resources at once; duplicate reads are coalesced and successful GETs
//!   are cached briefly
//! - [`ClientSideJoiner`] fills reference fields with resources fetched from
//!   other services
//! - [`SubmitHandler`] saves only what an edit changed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem_client::{ApiClient, BulkGetOptions, Config};
//!
//! # async fn run() -> tandem_client::Result<()> {
//! let api = ApiClient::new(Config::load()?)?;
//! let people = api
//!     .bulk_get(
//!         &["person/1".to_string(), "person/2".to_string()],
//!         &BulkGetOptions::new("/agent-api").return_null_for_missing(),
//!     )
//!     .await?;
//! assert_eq!(people.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod coalesce;
pub mod codec;
pub mod config;
pub mod error;
pub mod join;
pub mod routing;
pub mod save;
pub mod transport;

pub use cache::ResponseCache;
pub use client::{
    ApiClient, ApiClientBuilder, BulkGetOptions, BulkLoadOptions, BulkOptions, Document, GetParams,
    IdGenerator, SaveArg, SaveOptions,
};
pub use coalesce::Coalescer;
pub use codec::{FlatCodec, ResourceCodec};
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use join::{BulkFetcher, ClientSideJoiner, JoinPath, JoinSpec};
pub use routing::{
    BackendRoutingPolicy, BulkExtension, OperationsEndpoint, RoutingTable, SingleRequest,
    TransportCall,
};
pub use save::{NoHooks, SaveBackend, SaveHooks, SubmitConfig, SubmitHandler, ValueTransform};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
