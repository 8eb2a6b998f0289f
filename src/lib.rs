//! Couchbase Rust Client Core
//!
//! Query execution with prepared plan caching, sub-document lookups and
//! mutations, and key-to-node location for Couchbase-style document
//! databases. Sockets are left to a transport implementing
//! [`QueryTransport`] and [`SubdocTransport`]; [`HttpQueryTransport`] talks to
//! the query service over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use couchbase_client::{
//!   ClientConfig, HttpQueryTransport, QueryExecutor, QueryParameters, QueryRequest, PlanCache,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> couchbase_client::Result<()> {
//!   let config = ClientConfig::new().with_credentials("Administrator", "password");
//!   let transport = HttpQueryTransport::new("http://localhost:8093", config.credentials.clone())?;
//!   let executor = QueryExecutor::new(Arc::new(transport), Arc::new(PlanCache::default()));
//!
//!   // Prepared on first use, then served from the plan cache
//!   let request = QueryRequest::prepared(
//!     "SELECT name FROM `travel-sample` WHERE type = $1 LIMIT 10",
//!     QueryParameters::Positional(vec![json!("airline")]),
//!   );
//!   let result = executor.execute(&request).await?.collect().await?;
//!   for row in &result.rows {
//!     println!("{}", row);
//!   }
//!
//!   Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod error;
mod executor;
mod fragment;
mod http;
pub mod locator;
pub mod protocol;
pub mod query;
mod retry;
mod subdoc;
pub mod transport;

pub use cache::{CacheStats, PlanCache, PreparedPlan, DEFAULT_PLAN_CACHE_CAPACITY};
pub use client::Bucket;
pub use config::{ClientConfig, Credentials, RetryConfig};
pub use error::{Error, Result, SubdocError};
pub use executor::QueryExecutor;
pub use fragment::{DocumentFragment, FragmentTranscoder, JsonTranscoder, MultiResult};
pub use http::{split_response, HttpQueryTransport};
pub use locator::{BucketKind, KetamaRing, Partition, Topology, TopologyHandle};
pub use protocol::{
  LookupSpec, MutationSpec, MutationToken, PathResponse, ResponseStatus, SubdocCommand, SubdocOp,
  SubdocRequest, SubdocResponse, MAX_KEY_LENGTH, MAX_SUBDOC_SPECS,
};
pub use query::{
  BufferedQueryResult, QueryMetrics, QueryOptions, QueryParameters, QueryRequest, QueryResult,
  ScanConsistency,
};
pub use retry::{Delay, ExponentialDelay, FixedDelay, LinearDelay, Retry};
pub use subdoc::{LookupIn, MutateIn, SubdocEngine};
pub use transport::{BufferedSections, ChunkStream, QueryResponse, QueryTransport, SubdocTransport};
