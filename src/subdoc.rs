//! Sub-document lookups and mutations
//!
//! One request reads or writes several paths of a single document in one
//! round trip. A lone spec is sent as a single-path request without the
//! multi-path envelope; the resulting [`DocumentFragment`] looks the same
//! either way.
//!
//! Lookups contain path-level failures: each path's status rides inside the
//! fragment and only turns into an error when its content is read. Mutations
//! are all-or-nothing: the first failing spec fails the whole request and the
//! document is left untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result, SubdocError};
use crate::fragment::{DocumentFragment, FragmentTranscoder, JsonTranscoder, MultiResult};
use crate::protocol::{
  LookupSpec, MutationSpec, PathResponse, ResponseStatus, SubdocCommand, SubdocOp, SubdocRequest,
  SubdocResponse, MAX_KEY_LENGTH, MAX_SUBDOC_SPECS,
};
use crate::transport::SubdocTransport;

fn validate_document_id(id: &str) -> Result<()> {
  if id.is_empty() {
    return Err(Error::InvalidArgument("document id must not be empty".to_string()));
  }
  if id.len() > MAX_KEY_LENGTH {
    return Err(Error::InvalidArgument(format!(
      "document id is {} bytes, the limit is {}",
      id.len(),
      MAX_KEY_LENGTH
    )));
  }
  Ok(())
}

fn validate_paths<'a>(paths: impl ExactSizeIterator<Item = &'a str>) -> Result<()> {
  let count = paths.len();
  if count == 0 {
    return Err(Error::InvalidArgument("at least one spec is required".to_string()));
  }
  if count > MAX_SUBDOC_SPECS {
    return Err(Error::InvalidArgument(format!(
      "{} specs given, at most {} are allowed",
      count, MAX_SUBDOC_SPECS
    )));
  }
  let mut seen = HashSet::with_capacity(count);
  for path in paths {
    if !seen.insert(path) {
      return Err(Error::InvalidArgument(format!("path '{}' appears more than once", path)));
    }
  }
  Ok(())
}

/// Validated lookup request
#[derive(Debug, Clone, PartialEq)]
pub struct LookupIn {
  document_id: String,
  specs: Vec<LookupSpec>,
}

impl LookupIn {
  /// Checks the id and spec list before anything is sent.
  pub fn new(document_id: impl Into<String>, specs: Vec<LookupSpec>) -> Result<Self> {
    let document_id = document_id.into();
    validate_document_id(&document_id)?;
    validate_paths(specs.iter().map(|s| s.path.as_str()))?;
    if let Some(spec) = specs.iter().find(|s| !s.op.is_lookup()) {
      return Err(Error::InvalidArgument(format!(
        "{:?} is not a lookup operation",
        spec.op
      )));
    }
    Ok(Self { document_id, specs })
  }

  pub fn document_id(&self) -> &str {
    &self.document_id
  }

  pub fn specs(&self) -> &[LookupSpec] {
    &self.specs
  }
}

/// Validated mutation request
#[derive(Debug, Clone, PartialEq)]
pub struct MutateIn {
  document_id: String,
  specs: Vec<MutationSpec>,
  cas: Option<u64>,
  expiry: u32,
}

impl MutateIn {
  pub fn new(document_id: impl Into<String>, specs: Vec<MutationSpec>) -> Result<Self> {
    let document_id = document_id.into();
    validate_document_id(&document_id)?;
    validate_paths(specs.iter().map(|s| s.path.as_str()))?;
    for spec in &specs {
      if spec.op.is_lookup() {
        return Err(Error::InvalidArgument(format!(
          "{:?} is not a mutation operation",
          spec.op
        )));
      }
      if spec.path.is_empty() && spec.op.requires_path() {
        return Err(Error::InvalidArgument(format!(
          "{:?} requires a non-empty path",
          spec.op
        )));
      }
      if spec.op == SubdocOp::Counter && spec.value.as_ref().and_then(Value::as_i64) == Some(0) {
        return Err(Error::InvalidArgument("counter delta must not be zero".to_string()));
      }
    }
    Ok(Self {
      document_id,
      specs,
      cas: None,
      expiry: 0,
    })
  }

  /// Only apply if the document still has this CAS.
  pub fn with_cas(mut self, cas: u64) -> Self {
    self.cas = Some(cas);
    self
  }

  /// Document expiry in seconds (0 keeps it forever).
  pub fn with_expiry(mut self, expiry: u32) -> Self {
    self.expiry = expiry;
    self
  }

  pub fn document_id(&self) -> &str {
    &self.document_id
  }

  pub fn specs(&self) -> &[MutationSpec] {
    &self.specs
  }
}

/// Executes sub-document requests against one bucket
#[derive(Clone)]
pub struct SubdocEngine {
  bucket: String,
  transport: Arc<dyn SubdocTransport>,
  transcoder: Arc<dyn FragmentTranscoder>,
}

impl SubdocEngine {
  pub fn new(bucket: impl Into<String>, transport: Arc<dyn SubdocTransport>) -> Self {
    Self {
      bucket: bucket.into(),
      transport,
      transcoder: Arc::new(JsonTranscoder),
    }
  }

  pub fn with_transcoder(mut self, transcoder: Arc<dyn FragmentTranscoder>) -> Self {
    self.transcoder = transcoder;
    self
  }

  /// Build the wire request for a lookup.
  pub fn lookup_request(&self, lookup: &LookupIn) -> SubdocRequest {
    let command = match lookup.specs.as_slice() {
      [spec] => SubdocCommand::Lookup { spec: spec.clone() },
      specs => SubdocCommand::MultiLookup {
        specs: specs.to_vec(),
      },
    };
    SubdocRequest {
      bucket: self.bucket.clone(),
      document_id: lookup.document_id.clone(),
      cas: None,
      expiry: 0,
      command,
    }
  }

  /// Build the wire request for a mutation.
  pub fn mutate_request(&self, mutate: &MutateIn) -> SubdocRequest {
    let command = match mutate.specs.as_slice() {
      [spec] => SubdocCommand::Mutation { spec: spec.clone() },
      specs => SubdocCommand::MultiMutation {
        specs: specs.to_vec(),
      },
    };
    SubdocRequest {
      bucket: self.bucket.clone(),
      document_id: mutate.document_id.clone(),
      cas: mutate.cas,
      expiry: mutate.expiry,
      command,
    }
  }

  pub async fn lookup_in(&self, lookup: &LookupIn) -> Result<DocumentFragment> {
    let response = self.transport.send_subdoc(self.lookup_request(lookup)).await?;
    self.lookup_fragment(lookup, response)
  }

  pub async fn mutate_in(&self, mutate: &MutateIn) -> Result<DocumentFragment> {
    let response = self.transport.send_subdoc(self.mutate_request(mutate)).await?;
    self.mutation_fragment(mutate, response)
  }

  /// Interpret a raw lookup response.
  pub fn lookup_fragment(&self, lookup: &LookupIn, response: SubdocResponse) -> Result<DocumentFragment> {
    let id = lookup.document_id.as_str();
    let results = match lookup.specs.as_slice() {
      [spec] => {
        if !response.status.is_success() && !response.status.is_path_level() {
          return Err(document_error(id, response.status));
        }
        vec![self.path_result(&spec.path, spec.op, response.status, response.content)]
      }
      specs => {
        match response.status {
          ResponseStatus::Success | ResponseStatus::SubdocMultiPathFailure => {}
          status => return Err(document_error(id, status)),
        }
        let paths = specs.iter().map(|s| s.path.as_str());
        correlate(paths, response.results)?
          .into_iter()
          .zip(specs)
          .map(|(raw, spec)| self.path_result(&spec.path, spec.op, raw.status, raw.value))
          .collect()
      }
    };
    tracing::debug!(document = id, paths = results.len(), "lookup completed");
    Ok(DocumentFragment::new(id, response.cas, response.mutation_token, results))
  }

  /// Interpret a raw mutation response.
  pub fn mutation_fragment(&self, mutate: &MutateIn, response: SubdocResponse) -> Result<DocumentFragment> {
    let id = mutate.document_id.as_str();
    let results = match mutate.specs.as_slice() {
      [spec] => match response.status {
        ResponseStatus::Success => {
          vec![self.path_result(&spec.path, spec.op, response.status, response.content)]
        }
        status if status.is_path_level() => {
          return Err(Error::MutationFailed {
            index: 0,
            path: spec.path.clone(),
            kind: SubdocError::from_status(status),
          })
        }
        status => return Err(document_error(id, status)),
      },
      specs => match response.status {
        ResponseStatus::Success => {
          let paths = specs.iter().map(|s| s.path.as_str());
          correlate(paths, response.results)?
            .into_iter()
            .zip(specs)
            .map(|(raw, spec)| self.path_result(&spec.path, spec.op, raw.status, raw.value))
            .collect()
        }
        ResponseStatus::SubdocMultiPathFailure => {
          return Err(first_mutation_failure(specs, &response.results))
        }
        status => return Err(document_error(id, status)),
      },
    };
    tracing::debug!(document = id, cas = response.cas, "mutation applied");
    Ok(DocumentFragment::new(id, response.cas, response.mutation_token, results))
  }

  fn path_result(&self, path: &str, op: SubdocOp, status: ResponseStatus, raw: Option<Bytes>) -> MultiResult {
    let value = match (op, status) {
      (SubdocOp::Exists, ResponseStatus::Success) => Ok(Value::Bool(true)),
      (SubdocOp::Exists, ResponseStatus::SubdocPathNotFound) => Ok(Value::Bool(false)),
      (_, ResponseStatus::SubdocPathNotFound) => Ok(Value::Null),
      (_, ResponseStatus::Success) => match raw {
        Some(content) if !content.is_empty() => match self.transcoder.decode(path, &content) {
          Ok(value) => Ok(value),
          Err(e) => {
            tracing::warn!(path, error = %e, "cannot decode fragment");
            return MultiResult {
              path: path.to_string(),
              op,
              status: ResponseStatus::Failure,
              value: Err(SubdocError::Transcoding(e.to_string())),
            };
          }
        },
        _ => Ok(Value::Null),
      },
      (_, status) => Err(SubdocError::from_status(status)),
    };
    MultiResult {
      path: path.to_string(),
      op,
      status,
      value,
    }
  }
}

/// Pair each requested path with its response entry. Paths are unique within
/// a request, so the path string is an unambiguous join key.
fn correlate<'a>(paths: impl Iterator<Item = &'a str>, results: Vec<PathResponse>) -> Result<Vec<PathResponse>> {
  let mut by_path: HashMap<String, PathResponse> =
    results.into_iter().map(|r| (r.path.clone(), r)).collect();
  paths
    .map(|path| {
      by_path
        .remove(path)
        .ok_or_else(|| Error::Protocol(format!("response has no entry for path '{}'", path)))
    })
    .collect()
}

fn first_mutation_failure(specs: &[MutationSpec], results: &[PathResponse]) -> Error {
  let failed = specs.iter().enumerate().find_map(|(index, spec)| {
    results
      .iter()
      .find(|r| r.path == spec.path && !r.status.is_success())
      .map(|r| (index, spec, r.status))
  });
  match failed {
    Some((index, spec, status)) => Error::MutationFailed {
      index,
      path: spec.path.clone(),
      kind: SubdocError::from_status(status),
    },
    None => Error::Protocol("multi-path failure without a failing path".to_string()),
  }
}

fn document_error(id: &str, status: ResponseStatus) -> Error {
  match status {
    ResponseStatus::NotFound => Error::DocumentNotFound(id.to_string()),
    ResponseStatus::SubdocDocNotJson => Error::DocumentNotJson(id.to_string()),
    ResponseStatus::Exists => Error::CasMismatch(id.to_string()),
    other => Error::Server(other),
  }
}
