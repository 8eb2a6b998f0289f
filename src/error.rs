//! Error types for the client core.

use thiserror::Error;

use crate::protocol::ResponseStatus;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Connection error: {0}")]
  Connection(String),

  #[error("Transport error: {0}")]
  Transport(String),

  #[error("Request rejected: transport queue is full")]
  Backpressure,

  #[error("Request cancelled")]
  RequestCancelled,

  #[error("Serialization error: {0}")]
  Serialization(String),

  #[error("Transcoding error: {0}")]
  Transcoding(String),

  #[error("Document not found: {0}")]
  DocumentNotFound(String),

  #[error("Document is not JSON: {0}")]
  DocumentNotJson(String),

  #[error("CAS mismatch on document {0}")]
  CasMismatch(String),

  #[error("Sub-document error on path '{path}': {kind}")]
  Subdoc { path: String, kind: SubdocError },

  #[error("Mutation failed at spec {index} ('{path}'): {kind}")]
  MutationFailed {
    index: usize,
    path: String,
    kind: SubdocError,
  },

  #[error("Server error: {0:?}")]
  Server(ResponseStatus),

  #[error("Query error: {0}")]
  Query(serde_json::Value),

  #[error("Query failed with {} errors", .0.len())]
  CompositeQuery(Vec<serde_json::Value>),

  #[error("Partition {0} has no active node")]
  UnassignedPartition(u16),

  #[error("Replica {0} is not configured")]
  NoReplicaConfigured(u16),

  #[error("Unsupported bucket type: {0}")]
  UnsupportedBucketType(String),

  #[error("Timeout")]
  Timeout,

  #[error("Cannot retry: maximum of {attempts} attempts reached")]
  MaxAttemptsReached {
    attempts: u32,
    #[source]
    last: Box<Error>,
  },

  #[error("Cannot retry: {0}")]
  CannotRetry(#[source] Box<Error>),

  #[error("Protocol error: {0}")]
  Protocol(String),
}

impl Error {
  /// Whether re-issuing the same request may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Error::Connection(_) | Error::Transport(_) | Error::Backpressure | Error::RequestCancelled => {
        true
      }
      Error::Server(status) => status.is_temporary(),
      _ => false,
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_connect() {
      Self::Connection(e.to_string())
    } else {
      Self::Transport(e.to_string())
    }
  }
}

/// Per-path sub-document failure.
///
/// Held inside a [`crate::MultiResult`] and raised again whenever the path's
/// content is requested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubdocError {
  #[error("path not found")]
  PathNotFound,

  #[error("path does not match the document structure")]
  PathMismatch,

  #[error("path is malformed")]
  PathInvalid,

  #[error("path is too long or too deep")]
  PathTooBig,

  #[error("document is too deep to parse")]
  DocumentTooDeep,

  #[error("value cannot be inserted at path")]
  CannotInsertValue,

  #[error("document is not JSON")]
  DocumentNotJson,

  #[error("number is too big")]
  NumberTooBig,

  #[error("delta is zero or out of range")]
  BadDelta,

  #[error("path already exists")]
  PathExists,

  #[error("value is too deep to insert")]
  ValueTooDeep,

  #[error("invalid combination of operations")]
  InvalidCombo,

  #[error("fragment could not be decoded: {0}")]
  Transcoding(String),

  #[error("unexpected status {0:?}")]
  Unexpected(ResponseStatus),
}

impl SubdocError {
  pub fn from_status(status: ResponseStatus) -> Self {
    match status {
      ResponseStatus::SubdocPathNotFound => Self::PathNotFound,
      ResponseStatus::SubdocPathMismatch => Self::PathMismatch,
      ResponseStatus::SubdocPathInvalid => Self::PathInvalid,
      ResponseStatus::SubdocPathTooBig => Self::PathTooBig,
      ResponseStatus::SubdocDocTooDeep => Self::DocumentTooDeep,
      ResponseStatus::SubdocValueCantInsert => Self::CannotInsertValue,
      ResponseStatus::SubdocDocNotJson => Self::DocumentNotJson,
      ResponseStatus::SubdocNumRange => Self::NumberTooBig,
      ResponseStatus::SubdocDeltaRange => Self::BadDelta,
      ResponseStatus::SubdocPathExists => Self::PathExists,
      ResponseStatus::SubdocValueTooDeep => Self::ValueTooDeep,
      ResponseStatus::SubdocInvalidCombo => Self::InvalidCombo,
      other => Self::Unexpected(other),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
