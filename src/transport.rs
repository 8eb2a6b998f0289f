//! Transport seam
//!
//! The client core never talks to sockets itself. Query and sub-document
//! requests are handed to these traits, which return a single response or an
//! error. Query responses expose each section as its own lazy chunk stream so
//! rows can be consumed before the errors and metrics have arrived.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::FutureExt;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::{SubdocRequest, SubdocResponse};

/// Lazily delivered raw chunks of one response section
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Raw response of the query service
pub struct QueryResponse {
  /// Whether the service accepted and parsed the request.
  pub parse_success: bool,
  pub request_id: String,
  pub client_context_id: String,
  pub rows: ChunkStream,
  pub signature: ChunkStream,
  pub errors: ChunkStream,
  pub metrics: ChunkStream,
  /// Resolves to the terminal `status` string once the response completes.
  pub status: BoxFuture<'static, Result<String>>,
}

impl QueryResponse {
  /// Response whose sections are all available up front.
  pub fn buffered(
    parse_success: bool,
    request_id: impl Into<String>,
    client_context_id: impl Into<String>,
    sections: BufferedSections,
  ) -> Self {
    let BufferedSections {
      rows,
      signature,
      errors,
      metrics,
      status,
    } = sections;
    Self {
      parse_success,
      request_id: request_id.into(),
      client_context_id: client_context_id.into(),
      rows: chunks(rows),
      signature: chunks(signature),
      errors: chunks(errors),
      metrics: chunks(metrics),
      status: futures::future::ready(Ok(status)).boxed(),
    }
  }
}

/// Already received section contents, for transports that read the whole body
#[derive(Debug, Clone, Default)]
pub struct BufferedSections {
  pub rows: Vec<Bytes>,
  pub signature: Vec<Bytes>,
  pub errors: Vec<Bytes>,
  pub metrics: Vec<Bytes>,
  pub status: String,
}

fn chunks(items: Vec<Bytes>) -> ChunkStream {
  Box::pin(stream::iter(items.into_iter().map(Ok)))
}

#[async_trait]
pub trait QueryTransport: Send + Sync {
  /// Dispatch one JSON query body to the query service.
  async fn send_query(&self, body: Value) -> Result<QueryResponse>;
}

#[async_trait]
pub trait SubdocTransport: Send + Sync {
  async fn send_subdoc(&self, request: SubdocRequest) -> Result<SubdocResponse>;
}
