//! Aggregated outcome of a sub-document request.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result, SubdocError};
use crate::protocol::{MutationToken, ResponseStatus, SubdocOp};

/// Decodes raw fragment content returned by the server.
pub trait FragmentTranscoder: Send + Sync {
  fn decode(&self, path: &str, content: &[u8]) -> Result<Value>;
}

/// Decodes fragments as JSON, keeping objects and arrays structured.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranscoder;

impl FragmentTranscoder for JsonTranscoder {
  fn decode(&self, path: &str, content: &[u8]) -> Result<Value> {
    serde_json::from_slice(content)
      .map_err(|e| Error::Transcoding(format!("path '{}': {}", path, e)))
  }
}

/// Outcome of one spec
#[derive(Debug, Clone, PartialEq)]
pub struct MultiResult {
  pub path: String,
  pub op: SubdocOp,
  pub status: ResponseStatus,
  pub value: std::result::Result<Value, SubdocError>,
}

impl MultiResult {
  pub fn exists(&self) -> bool {
    self.status.is_success() && self.value.is_ok()
  }

  fn content(&self) -> Result<&Value> {
    self.value.as_ref().map_err(|kind| Error::Subdoc {
      path: self.path.clone(),
      kind: kind.clone(),
    })
  }
}

/// Per-path results of one lookup or mutation against one document, in spec
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFragment {
  id: String,
  cas: u64,
  mutation_token: Option<MutationToken>,
  results: Vec<MultiResult>,
}

impl DocumentFragment {
  pub fn new(
    id: impl Into<String>,
    cas: u64,
    mutation_token: Option<MutationToken>,
    results: Vec<MultiResult>,
  ) -> Self {
    Self {
      id: id.into(),
      cas,
      mutation_token,
      results,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn cas(&self) -> u64 {
    self.cas
  }

  pub fn mutation_token(&self) -> Option<&MutationToken> {
    self.mutation_token.as_ref()
  }

  pub fn size(&self) -> usize {
    self.results.len()
  }

  pub fn results(&self) -> &[MultiResult] {
    &self.results
  }

  fn by_path(&self, path: &str) -> Option<&MultiResult> {
    self.results.iter().find(|r| r.path == path)
  }

  /// Decoded content at `path`; `Null` when the path was not found.
  ///
  /// Raises the path's own error if the server reported one.
  pub fn content(&self, path: &str) -> Result<&Value> {
    self
      .by_path(path)
      .ok_or_else(|| Error::InvalidArgument(format!("no result for path '{}'", path)))?
      .content()
  }

  pub fn content_at(&self, index: usize) -> Result<&Value> {
    self
      .results
      .get(index)
      .ok_or_else(|| Error::InvalidArgument(format!("no result at index {}", index)))?
      .content()
  }

  pub fn content_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let value = self.content(path)?;
    serde_json::from_value(value.clone())
      .map_err(|e| Error::Transcoding(format!("path '{}': {}", path, e)))
  }

  /// Never fails: missing paths, absent values and errors all read as false.
  pub fn exists(&self, path: &str) -> bool {
    self.by_path(path).is_some_and(MultiResult::exists)
  }

  pub fn exists_at(&self, index: usize) -> bool {
    self.results.get(index).is_some_and(MultiResult::exists)
  }

  pub fn status(&self, path: &str) -> Option<ResponseStatus> {
    self.by_path(path).map(|r| r.status)
  }

  pub fn status_at(&self, index: usize) -> Option<ResponseStatus> {
    self.results.get(index).map(|r| r.status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn fragment() -> DocumentFragment {
    DocumentFragment::new(
      "doc",
      7,
      None,
      vec![
        MultiResult {
          path: "name".to_string(),
          op: SubdocOp::Get,
          status: ResponseStatus::Success,
          value: Ok(json!("Ann")),
        },
        MultiResult {
          path: "age".to_string(),
          op: SubdocOp::Get,
          status: ResponseStatus::SubdocPathNotFound,
          value: Ok(Value::Null),
        },
        MultiResult {
          path: "tags.x".to_string(),
          op: SubdocOp::Get,
          status: ResponseStatus::SubdocPathMismatch,
          value: Err(SubdocError::PathMismatch),
        },
      ],
    )
  }

  #[test]
  fn test_content_by_path_and_index() {
    let f = fragment();
    assert_eq!(f.content("name").unwrap(), &json!("Ann"));
    assert_eq!(f.content_at(0).unwrap(), &json!("Ann"));
    assert_eq!(f.content("age").unwrap(), &Value::Null);
    assert_eq!(f.content_as::<String>("name").unwrap(), "Ann");
  }

  #[test]
  fn test_errored_path_raises_on_every_access() {
    let f = fragment();
    for _ in 0..2 {
      match f.content("tags.x") {
        Err(Error::Subdoc { path, kind }) => {
          assert_eq!(path, "tags.x");
          assert_eq!(kind, SubdocError::PathMismatch);
        }
        other => panic!("expected path mismatch, got {:?}", other),
      }
    }
    assert!(!f.exists("tags.x"));
    assert_eq!(f.status("tags.x"), Some(ResponseStatus::SubdocPathMismatch));
  }

  #[test]
  fn test_unknown_path_and_index() {
    let f = fragment();
    assert!(matches!(f.content("nope"), Err(Error::InvalidArgument(_))));
    assert!(matches!(f.content_at(9), Err(Error::InvalidArgument(_))));
    assert!(!f.exists("nope"));
    assert!(!f.exists_at(9));
    assert_eq!(f.status_at(9), None);
  }

  #[test]
  fn test_json_transcoder() {
    let t = JsonTranscoder;
    assert_eq!(t.decode("p", br#"{"a":[1,2]}"#).unwrap(), json!({"a": [1, 2]}));
    assert_eq!(t.decode("p", b"42").unwrap(), json!(42));
    assert!(matches!(t.decode("p", b"{oops"), Err(Error::Transcoding(_))));
  }
}
