//! Bucket-level entry points.
//!
//! [`Bucket`] ties the query executor, the sub-document engine and the key
//! locator to one bucket and puts the configured timeouts and retries around
//! them. The timeout covers the whole call including retries, so a timeout
//! is never retried itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::PlanCache;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::fragment::DocumentFragment;
use crate::locator::TopologyHandle;
use crate::protocol::{LookupSpec, MutationSpec};
use crate::query::{BufferedQueryResult, QueryRequest, QueryResult};
use crate::retry::Retry;
use crate::subdoc::{LookupIn, MutateIn, SubdocEngine};
use crate::transport::{QueryTransport, SubdocTransport};

pub struct Bucket {
  name: String,
  config: ClientConfig,
  executor: QueryExecutor,
  subdoc: SubdocEngine,
  topology: TopologyHandle,
  retry: Retry,
}

impl Bucket {
  pub fn new(
    name: impl Into<String>,
    config: ClientConfig,
    query: Arc<dyn QueryTransport>,
    kv: Arc<dyn SubdocTransport>,
    topology: TopologyHandle,
  ) -> Self {
    let name = name.into();
    let cache = Arc::new(PlanCache::new(config.plan_cache_capacity));
    let retry = Retry::from_config(&config.retry).stop_when(|e| !e.is_retryable());
    Self {
      executor: QueryExecutor::new(query, cache),
      subdoc: SubdocEngine::new(name.clone(), kv),
      name,
      config,
      topology,
      retry,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  pub fn plan_cache(&self) -> &PlanCache {
    self.executor.plan_cache()
  }

  pub fn executor(&self) -> &QueryExecutor {
    &self.executor
  }

  pub fn topology(&self) -> &TopologyHandle {
    &self.topology
  }

  /// Run a query and buffer the whole result.
  pub async fn query(&self, request: &QueryRequest) -> Result<BufferedQueryResult> {
    let timeout = request.options().timeout.unwrap_or(self.config.query_timeout);
    with_timeout(timeout, async {
      self
        .retry
        .run(move || async move { self.executor.execute(request).await?.collect().await })
        .await
        .map_err(unwrap_terminal)
    })
    .await
  }

  /// Start a query and hand back the streamed result once the response
  /// header has arrived. Only the dispatch is bounded by the timeout.
  pub async fn query_stream(&self, request: &QueryRequest) -> Result<QueryResult> {
    let timeout = request.options().timeout.unwrap_or(self.config.query_timeout);
    with_timeout(timeout, self.executor.execute(request)).await
  }

  pub async fn lookup_in(&self, id: &str, specs: Vec<LookupSpec>) -> Result<DocumentFragment> {
    let lookup = LookupIn::new(id, specs)?;
    with_timeout(self.config.kv_timeout, async {
      self
        .retry
        .run(|| self.subdoc.lookup_in(&lookup))
        .await
        .map_err(unwrap_terminal)
    })
    .await
  }

  /// Mutations are sent once; a failed write is never re-issued.
  pub async fn mutate_in(&self, mutate: MutateIn) -> Result<DocumentFragment> {
    with_timeout(self.config.kv_timeout, self.subdoc.mutate_in(&mutate)).await
  }

  pub async fn mutate_specs(&self, id: &str, specs: Vec<MutationSpec>) -> Result<DocumentFragment> {
    self.mutate_in(MutateIn::new(id, specs)?).await
  }

  pub fn locate(&self, key: &str) -> Result<String> {
    self.topology.locate_active(key)
  }

  pub fn locate_replica(&self, key: &str, ordinal: u16) -> Result<String> {
    self.topology.locate_replica(key, ordinal)
  }

  pub fn locate_all_replicas(&self, key: &str) -> Result<Vec<String>> {
    self.topology.locate_all_replicas(key)
  }
}

/// Hand non-retryable errors back as they were raised. Only a retryable
/// error that used up the attempt budget stays `MaxAttemptsReached`.
fn unwrap_terminal(error: Error) -> Error {
  match error {
    Error::CannotRetry(cause) => *cause,
    Error::MaxAttemptsReached { last, .. } if !last.is_retryable() => *last,
    other => other,
  }
}

async fn with_timeout<T>(timeout: Duration, operation: impl Future<Output = Result<T>>) -> Result<T> {
  match tokio::time::timeout(timeout, operation).await {
    Ok(result) => result,
    Err(_) => {
      tracing::debug!(?timeout, "operation timed out");
      Err(Error::Timeout)
    }
  }
}
