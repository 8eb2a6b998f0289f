//! Query requests and streamed results
//!
//! A [`QueryRequest`] is built once and rendered into the JSON body the query
//! service expects, either as a plain statement or as a reference to a
//! prepared plan. A [`QueryResult`] decodes each response section lazily.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cache::PreparedPlan;
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::protocol::MutationToken;
use crate::transport::{ChunkStream, QueryResponse};

/// Staleness a query accepts relative to recent mutations
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScanConsistency {
  #[default]
  NotBounded,
  RequestPlus,
  StatementPlus,
  AtPlus(Vec<MutationToken>),
}

/// Statement placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParameters {
  #[default]
  None,
  Positional(Vec<Value>),
  /// Named values; a leading `$` is added when missing.
  Named(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
  /// Send the statement as-is instead of through a prepared plan.
  pub adhoc: bool,
  pub parameters: QueryParameters,
  pub consistency: ScanConsistency,
  pub timeout: Option<Duration>,
  pub credentials: Vec<Credentials>,
  pub client_context_id: Option<String>,
  pub readonly: bool,
  pub max_parallelism: Option<u32>,
  pub scan_wait: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      adhoc: true,
      parameters: QueryParameters::None,
      consistency: ScanConsistency::NotBounded,
      timeout: None,
      credentials: Vec::new(),
      client_context_id: None,
      readonly: false,
      max_parallelism: None,
      scan_wait: None,
    }
  }
}

/// A N1QL statement plus its execution options
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
  statement: String,
  options: QueryOptions,
}

impl QueryRequest {
  pub fn new(statement: impl Into<String>, options: QueryOptions) -> Self {
    Self {
      statement: statement.into(),
      options,
    }
  }

  /// Ad-hoc statement with default options
  pub fn adhoc(statement: impl Into<String>) -> Self {
    Self::new(statement, QueryOptions::default())
  }

  /// Statement executed through the prepared plan cache
  pub fn prepared(statement: impl Into<String>, parameters: QueryParameters) -> Self {
    Self::new(
      statement,
      QueryOptions {
        adhoc: false,
        parameters,
        ..QueryOptions::default()
      },
    )
  }

  pub fn statement(&self) -> &str {
    &self.statement
  }

  pub fn options(&self) -> &QueryOptions {
    &self.options
  }

  pub fn is_adhoc(&self) -> bool {
    self.options.adhoc
  }

  /// Context id sent with the request, generated when the caller set none.
  pub fn client_context_id(&self) -> String {
    self
      .options
      .client_context_id
      .clone()
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
  }

  /// Body carrying the raw statement.
  pub fn statement_body(&self, context_id: &str) -> Value {
    let mut body = Map::new();
    body.insert("statement".to_string(), Value::String(self.statement.clone()));
    self.inject_parameters(&mut body);
    self.inject_options(&mut body, context_id);
    Value::Object(body)
  }

  /// Body referencing a prepared plan instead of the statement text.
  pub fn prepared_body(&self, plan: &PreparedPlan, context_id: &str) -> Value {
    let mut body = Map::new();
    body.insert("prepared".to_string(), Value::String(plan.name.clone()));
    body.insert(
      "encoded_plan".to_string(),
      Value::String(plan.encoded_plan.clone()),
    );
    self.inject_parameters(&mut body);
    self.inject_options(&mut body, context_id);
    Value::Object(body)
  }

  /// Body asking the service to prepare this statement.
  pub fn prepare_body(&self, context_id: &str) -> Value {
    let mut body = Map::new();
    body.insert(
      "statement".to_string(),
      Value::String(format!("PREPARE {}", self.statement)),
    );
    self.inject_common(&mut body, context_id);
    Value::Object(body)
  }

  fn inject_parameters(&self, body: &mut Map<String, Value>) {
    match &self.options.parameters {
      QueryParameters::None => {}
      QueryParameters::Positional(args) => {
        body.insert("args".to_string(), Value::Array(args.clone()));
      }
      QueryParameters::Named(named) => {
        for (name, value) in named {
          let key = if name.starts_with('$') {
            name.clone()
          } else {
            format!("${}", name)
          };
          body.insert(key, value.clone());
        }
      }
    }
  }

  fn inject_options(&self, body: &mut Map<String, Value>, context_id: &str) {
    let options = &self.options;
    match &options.consistency {
      ScanConsistency::NotBounded => {}
      ScanConsistency::RequestPlus => {
        body.insert("scan_consistency".to_string(), json!("request_plus"));
      }
      ScanConsistency::StatementPlus => {
        body.insert("scan_consistency".to_string(), json!("statement_plus"));
      }
      ScanConsistency::AtPlus(tokens) => {
        body.insert("scan_consistency".to_string(), json!("at_plus"));
        body.insert("scan_vectors".to_string(), scan_vectors(tokens));
      }
    }
    if let Some(wait) = options.scan_wait {
      body.insert("scan_wait".to_string(), json!(format!("{}ms", wait.as_millis())));
    }
    if options.readonly {
      body.insert("readonly".to_string(), json!(true));
    }
    if let Some(max) = options.max_parallelism {
      body.insert("max_parallelism".to_string(), json!(max.to_string()));
    }
    self.inject_common(body, context_id);
  }

  fn inject_common(&self, body: &mut Map<String, Value>, context_id: &str) {
    let options = &self.options;
    if let Some(timeout) = options.timeout {
      body.insert("timeout".to_string(), json!(format!("{}ms", timeout.as_millis())));
    }
    if !options.credentials.is_empty() {
      let creds: Vec<Value> = options
        .credentials
        .iter()
        .map(|c| json!({"user": c.username, "pass": c.password}))
        .collect();
      body.insert("creds".to_string(), Value::Array(creds));
    }
    body.insert("client_context_id".to_string(), json!(context_id));
  }
}

/// `{bucket: {vbid: [seqno, "vbuuid"]}}`, keeping the highest sequence per
/// partition.
fn scan_vectors(tokens: &[MutationToken]) -> Value {
  let mut buckets: Map<String, Value> = Map::new();
  for token in tokens {
    let entry = buckets
      .entry(token.bucket.clone())
      .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(vectors) = entry {
      let vbid = token.vbucket_id.to_string();
      let newer = vectors
        .get(&vbid)
        .and_then(|v| v[0].as_u64())
        .map_or(true, |seq| token.sequence_number > seq);
      if newer {
        vectors.insert(
          vbid,
          json!([token.sequence_number, token.vbucket_uuid.to_string()]),
        );
      }
    }
  }
  Value::Object(buckets)
}

/// Execution statistics reported with a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryMetrics {
  pub elapsed_time: String,
  pub execution_time: String,
  pub result_count: u64,
  pub result_size: u64,
  pub mutation_count: u64,
  pub sort_count: u64,
  pub error_count: u64,
  pub warning_count: u64,
}

/// Plan name and encoded form from the single row of a `PREPARE` response
#[derive(Debug, Deserialize)]
pub(crate) struct PrepareRow {
  pub name: String,
  pub encoded_plan: String,
}

/// Streamed query result. Each section decodes independently as its chunks
/// arrive; streams are single-use.
pub struct QueryResult {
  pub request_id: String,
  pub client_context_id: String,
  pub parse_success: bool,
  pub rows: BoxStream<'static, Result<Value>>,
  pub signature: BoxStream<'static, Result<Value>>,
  pub errors: BoxStream<'static, Result<Value>>,
  pub metrics: BoxStream<'static, Result<QueryMetrics>>,
  /// Resolves once the terminal status has been observed.
  pub final_success: BoxFuture<'static, Result<bool>>,
}

impl QueryResult {
  pub fn from_response(response: QueryResponse) -> Self {
    let QueryResponse {
      parse_success,
      request_id,
      client_context_id,
      rows,
      signature,
      errors,
      metrics,
      status,
    } = response;
    Self {
      request_id,
      client_context_id,
      parse_success,
      rows: decode_chunks(rows, "row"),
      signature: decode_chunks(signature, "signature"),
      errors: decode_chunks(errors, "error"),
      metrics: decode_chunks(metrics, "metrics"),
      final_success: status.map(|s| s.map(|s| is_final_success(&s))).boxed(),
    }
  }

  /// Drain every section into memory.
  pub async fn collect(self) -> Result<BufferedQueryResult> {
    let rows: Vec<Value> = self.rows.try_collect().await?;
    let mut signature: Vec<Value> = self.signature.try_collect().await?;
    let errors: Vec<Value> = self.errors.try_collect().await?;
    let mut metrics: Vec<QueryMetrics> = self.metrics.try_collect().await?;
    let final_success = self.final_success.await?;
    Ok(BufferedQueryResult {
      request_id: self.request_id,
      client_context_id: self.client_context_id,
      parse_success: self.parse_success,
      final_success,
      rows,
      signature: signature.pop(),
      errors,
      metrics: metrics.pop(),
    })
  }
}

/// `"success"` and `"completed"` (any case) count as a successful finish.
pub fn is_final_success(status: &str) -> bool {
  status.eq_ignore_ascii_case("success") || status.eq_ignore_ascii_case("completed")
}

fn decode_chunks<T>(chunks: ChunkStream, section: &'static str) -> BoxStream<'static, Result<T>>
where
  T: DeserializeOwned + Send + 'static,
{
  chunks
    .map(move |chunk| {
      let chunk = chunk?;
      serde_json::from_slice(&chunk)
        .map_err(|e| Error::Transcoding(format!("cannot decode query {}: {}", section, e)))
    })
    .boxed()
}

/// A fully received query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedQueryResult {
  pub request_id: String,
  pub client_context_id: String,
  pub parse_success: bool,
  pub final_success: bool,
  pub rows: Vec<Value>,
  pub signature: Option<Value>,
  pub errors: Vec<Value>,
  pub metrics: Option<QueryMetrics>,
}

impl BufferedQueryResult {
  pub fn is_success(&self) -> bool {
    self.parse_success && self.final_success
  }

  pub fn rows_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
    self
      .rows
      .iter()
      .map(|row| {
        serde_json::from_value(row.clone()).map_err(|e| Error::Transcoding(e.to_string()))
      })
      .collect()
  }
}
