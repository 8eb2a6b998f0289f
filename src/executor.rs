//! Query executor
//!
//! Ad-hoc statements go straight to the query service. Other statements are
//! executed through a prepared plan: the plan cache is consulted first, and on
//! a miss the statement is sent as `PREPARE <statement>`, the returned plan is
//! cached under the original statement text and then executed.
//!
//! Two callers preparing the same statement at once may both send `PREPARE`;
//! the last plan stored wins.

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::cache::{PlanCache, PreparedPlan};
use crate::error::{Error, Result};
use crate::query::{PrepareRow, QueryRequest, QueryResult};
use crate::transport::QueryTransport;

/// Error codes meaning the service no longer knows the prepared plan.
const PLAN_MISS_CODES: [i64; 3] = [4040, 4050, 4070];

#[derive(Clone)]
pub struct QueryExecutor {
  transport: Arc<dyn QueryTransport>,
  cache: Arc<PlanCache>,
}

impl QueryExecutor {
  pub fn new(transport: Arc<dyn QueryTransport>, cache: Arc<PlanCache>) -> Self {
    Self { transport, cache }
  }

  pub fn plan_cache(&self) -> &Arc<PlanCache> {
    &self.cache
  }

  /// Execute a request. Nothing is sent until the returned future is polled.
  pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
    let context_id = request.client_context_id();
    if request.is_adhoc() {
      tracing::debug!(context_id = %context_id, "dispatching ad-hoc statement");
      return self.dispatch(request.statement_body(&context_id)).await;
    }

    let plan = match self.cache.get(request.statement()) {
      Some(plan) => {
        tracing::debug!(plan = %plan.name, "prepared plan cache hit");
        plan
      }
      None => {
        tracing::debug!(statement = request.statement(), "prepared plan cache miss");
        self.prepare(request, &context_id).await?
      }
    };

    let mut result = self.dispatch(request.prepared_body(&plan, &context_id)).await?;
    if result.parse_success {
      return Ok(result);
    }

    let errors: Vec<Value> = result.errors.try_collect().await?;
    if errors.iter().any(is_plan_miss) {
      tracing::debug!(plan = %plan.name, "prepared plan is stale, preparing again");
      let plan = self.prepare(request, &context_id).await?;
      return self.dispatch(request.prepared_body(&plan, &context_id)).await;
    }
    result.errors = stream::iter(errors.into_iter().map(Ok)).boxed();
    Ok(result)
  }

  /// Prepare a statement and cache the plan under its original text.
  pub async fn prepare(&self, request: &QueryRequest, context_id: &str) -> Result<Arc<PreparedPlan>> {
    let response = self.transport.send_query(request.prepare_body(context_id)).await?;
    let result = QueryResult::from_response(response);
    let parse_success = result.parse_success;

    let rows: Vec<Value> = result.rows.try_collect().await?;
    let mut errors: Vec<Value> = result.errors.try_collect().await?;
    let final_success = result.final_success.await?;

    if !parse_success || !final_success || !errors.is_empty() {
      return Err(match errors.len() {
        0 => Error::Protocol("PREPARE failed without reporting an error".to_string()),
        1 => Error::Query(errors.remove(0)),
        _ => Error::CompositeQuery(errors),
      });
    }

    let row = rows
      .into_iter()
      .next()
      .ok_or_else(|| Error::Protocol("PREPARE returned no plan".to_string()))?;
    let PrepareRow { name, encoded_plan } = serde_json::from_value(row)
      .map_err(|e| Error::Transcoding(format!("cannot decode prepared plan: {}", e)))?;

    tracing::debug!(plan = %name, "caching prepared plan");
    Ok(self.cache.put(PreparedPlan {
      statement: request.statement().to_string(),
      name,
      encoded_plan,
    }))
  }

  async fn dispatch(&self, body: Value) -> Result<QueryResult> {
    let response = self.transport.send_query(body).await?;
    Ok(QueryResult::from_response(response))
  }
}

fn is_plan_miss(error: &Value) -> bool {
  error
    .get("code")
    .and_then(Value::as_i64)
    .is_some_and(|code| PLAN_MISS_CODES.contains(&code))
}
