//! HTTP transport for the query service.
//!
//! Posts the JSON body to `<base>/query/service` and splits the reply into
//! the sections [`QueryResponse`] exposes. The body is read in full before
//! the sections are handed out.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::transport::{BufferedSections, QueryResponse, QueryTransport};

pub struct HttpQueryTransport {
  client: reqwest::Client,
  endpoint: String,
  credentials: Option<Credentials>,
}

impl HttpQueryTransport {
  /// `base_url` is the query node, e.g. `http://localhost:8093`.
  pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(Self {
      client,
      endpoint: format!("{}/query/service", base_url.trim_end_matches('/')),
      credentials,
    })
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }
}

#[async_trait]
impl QueryTransport for HttpQueryTransport {
  async fn send_query(&self, body: Value) -> Result<QueryResponse> {
    let mut request = self.client.post(&self.endpoint).json(&body);
    if let Some(creds) = &self.credentials {
      request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    let response = request.send().await?;
    let parse_success = response.status().is_success();
    let payload: Value = response.json().await?;
    split_response(parse_success, payload)
  }
}

/// Break a query service reply into its sections.
pub fn split_response(parse_success: bool, payload: Value) -> Result<QueryResponse> {
  let Value::Object(mut fields) = payload else {
    return Err(Error::Protocol("query response is not a JSON object".to_string()));
  };
  let text = |value: Option<Value>| match value {
    Some(Value::String(s)) => s,
    _ => String::new(),
  };
  let request_id = text(fields.remove("requestID"));
  let client_context_id = text(fields.remove("clientContextID"));
  let status = text(fields.remove("status"));

  let sections = BufferedSections {
    rows: encode_items(fields.remove("results"))?,
    signature: encode_items(fields.remove("signature"))?,
    errors: encode_items(fields.remove("errors"))?,
    metrics: encode_items(fields.remove("metrics"))?,
    status,
  };
  Ok(QueryResponse::buffered(parse_success, request_id, client_context_id, sections))
}

/// Arrays become one chunk per element; any other value is a single chunk.
fn encode_items(section: Option<Value>) -> Result<Vec<Bytes>> {
  let items = match section {
    None | Some(Value::Null) => Vec::new(),
    Some(Value::Array(items)) => items,
    Some(other) => vec![other],
  };
  items
    .iter()
    .map(|item| -> Result<Bytes> { Ok(Bytes::from(serde_json::to_vec(item)?)) })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::QueryResult;
  use serde_json::json;

  #[test]
  fn test_endpoint_trims_slash() {
    let transport = HttpQueryTransport::new("http://localhost:8093/", None).unwrap();
    assert_eq!(transport.endpoint(), "http://localhost:8093/query/service");
  }

  #[tokio::test]
  async fn test_split_response_sections() {
    let payload = json!({
      "requestID": "r-1",
      "clientContextID": "c-1",
      "signature": {"*": "*"},
      "results": [{"name": "a"}, {"name": "b"}],
      "status": "success",
      "metrics": {"elapsedTime": "1ms", "executionTime": "1ms", "resultCount": 2, "resultSize": 20}
    });
    let response = split_response(true, payload).unwrap();
    let result = QueryResult::from_response(response).collect().await.unwrap();
    assert_eq!(result.request_id, "r-1");
    assert_eq!(result.client_context_id, "c-1");
    assert_eq!(result.rows, vec![json!({"name": "a"}), json!({"name": "b"})]);
    assert_eq!(result.signature, Some(json!({"*": "*"})));
    assert_eq!(result.metrics.unwrap().result_count, 2);
    assert!(result.errors.is_empty());
    assert!(result.final_success);
  }

  #[tokio::test]
  async fn test_split_response_errors() {
    let payload = json!({
      "requestID": "r-2",
      "errors": [{"code": 3000, "msg": "syntax error"}],
      "status": "fatal"
    });
    let response = split_response(false, payload).unwrap();
    let result = QueryResult::from_response(response).collect().await.unwrap();
    assert!(!result.parse_success);
    assert!(!result.final_success);
    assert_eq!(result.errors[0]["code"], 3000);
  }

  #[test]
  fn test_split_response_rejects_non_object() {
    assert!(matches!(split_response(true, json!([1])), Err(Error::Protocol(_))));
  }
}
