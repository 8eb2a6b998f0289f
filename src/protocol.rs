//! Wire-level types shared with the transport: status codes, sub-document
//! opcodes, operation specs and the request/response shapes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest document id the server accepts, in UTF-8 bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Most specs a single multi-path request may carry.
pub const MAX_SUBDOC_SPECS: usize = 16;

/// Partition map entry for a partition without an active node.
pub const PARTITION_UNASSIGNED: i16 = -1;

/// Partition map entry for a replica slot the bucket does not have.
pub const PARTITION_NOT_EXISTENT: i16 = -2;

/// Key-value response status codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
  Success = 0x00,
  NotFound = 0x01,
  Exists = 0x02,
  TooBig = 0x03,
  InvalidArguments = 0x04,
  NotStored = 0x05,
  NotMyVbucket = 0x07,
  TemporaryFailure = 0x86,
  SubdocPathNotFound = 0xc0,
  SubdocPathMismatch = 0xc1,
  SubdocPathInvalid = 0xc2,
  SubdocPathTooBig = 0xc3,
  SubdocDocTooDeep = 0xc4,
  SubdocValueCantInsert = 0xc5,
  SubdocDocNotJson = 0xc6,
  SubdocNumRange = 0xc7,
  SubdocDeltaRange = 0xc8,
  SubdocPathExists = 0xc9,
  SubdocValueTooDeep = 0xca,
  SubdocInvalidCombo = 0xcb,
  SubdocMultiPathFailure = 0xcc,
  /// Client-side status for a path whose content could not be decoded.
  Failure = 0xffff,
}

impl ResponseStatus {
  pub fn is_success(self) -> bool {
    self == Self::Success
  }

  pub fn is_temporary(self) -> bool {
    matches!(self, Self::TemporaryFailure | Self::NotMyVbucket)
  }

  /// Statuses that describe one path rather than the whole document.
  pub fn is_path_level(self) -> bool {
    matches!(
      self,
      Self::SubdocPathNotFound
        | Self::SubdocPathMismatch
        | Self::SubdocPathInvalid
        | Self::SubdocPathTooBig
        | Self::SubdocDocTooDeep
        | Self::SubdocValueCantInsert
        | Self::SubdocNumRange
        | Self::SubdocDeltaRange
        | Self::SubdocPathExists
        | Self::SubdocValueTooDeep
    )
  }
}

impl TryFrom<u16> for ResponseStatus {
  type Error = ();
  fn try_from(v: u16) -> Result<Self, Self::Error> {
    match v {
      0x00 => Ok(Self::Success),
      0x01 => Ok(Self::NotFound),
      0x02 => Ok(Self::Exists),
      0x03 => Ok(Self::TooBig),
      0x04 => Ok(Self::InvalidArguments),
      0x05 => Ok(Self::NotStored),
      0x07 => Ok(Self::NotMyVbucket),
      0x86 => Ok(Self::TemporaryFailure),
      0xc0 => Ok(Self::SubdocPathNotFound),
      0xc1 => Ok(Self::SubdocPathMismatch),
      0xc2 => Ok(Self::SubdocPathInvalid),
      0xc3 => Ok(Self::SubdocPathTooBig),
      0xc4 => Ok(Self::SubdocDocTooDeep),
      0xc5 => Ok(Self::SubdocValueCantInsert),
      0xc6 => Ok(Self::SubdocDocNotJson),
      0xc7 => Ok(Self::SubdocNumRange),
      0xc8 => Ok(Self::SubdocDeltaRange),
      0xc9 => Ok(Self::SubdocPathExists),
      0xca => Ok(Self::SubdocValueTooDeep),
      0xcb => Ok(Self::SubdocInvalidCombo),
      0xcc => Ok(Self::SubdocMultiPathFailure),
      _ => Err(()),
    }
  }
}

/// Sub-document opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdocOp {
  Get = 0xc5,
  Exists = 0xc6,
  DictAdd = 0xc7,
  DictUpsert = 0xc8,
  Delete = 0xc9,
  Replace = 0xca,
  ArrayPushLast = 0xcb,
  ArrayPushFirst = 0xcc,
  ArrayInsert = 0xcd,
  ArrayAddUnique = 0xce,
  Counter = 0xcf,
}

impl SubdocOp {
  pub fn is_lookup(self) -> bool {
    matches!(self, Self::Get | Self::Exists)
  }

  /// Whether the op rejects an empty path. Array pushes may target the
  /// document root.
  pub fn requires_path(self) -> bool {
    !matches!(self, Self::Get | Self::Exists | Self::ArrayPushLast | Self::ArrayPushFirst)
  }
}

impl TryFrom<u8> for SubdocOp {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0xc5 => Ok(Self::Get),
      0xc6 => Ok(Self::Exists),
      0xc7 => Ok(Self::DictAdd),
      0xc8 => Ok(Self::DictUpsert),
      0xc9 => Ok(Self::Delete),
      0xca => Ok(Self::Replace),
      0xcb => Ok(Self::ArrayPushLast),
      0xcc => Ok(Self::ArrayPushFirst),
      0xcd => Ok(Self::ArrayInsert),
      0xce => Ok(Self::ArrayAddUnique),
      0xcf => Ok(Self::Counter),
      _ => Err(()),
    }
  }
}

/// One read within a lookup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
  pub op: SubdocOp,
  pub path: String,
}

impl LookupSpec {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      op: SubdocOp::Get,
      path: path.into(),
    }
  }

  pub fn exists(path: impl Into<String>) -> Self {
    Self {
      op: SubdocOp::Exists,
      path: path.into(),
    }
  }
}

/// One write within a mutation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSpec {
  pub op: SubdocOp,
  pub path: String,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub value: Option<Value>,
  #[serde(skip_serializing_if = "std::ops::Not::not", default)]
  pub create_parents: bool,
}

impl MutationSpec {
  fn new(op: SubdocOp, path: impl Into<String>, value: Option<Value>, create_parents: bool) -> Self {
    Self {
      op,
      path: path.into(),
      value,
      create_parents,
    }
  }

  pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::new(SubdocOp::Replace, path, Some(value.into()), false)
  }

  /// Add a dictionary entry, failing if it already exists.
  pub fn insert(path: impl Into<String>, value: impl Into<Value>, create_parents: bool) -> Self {
    Self::new(SubdocOp::DictAdd, path, Some(value.into()), create_parents)
  }

  pub fn upsert(path: impl Into<String>, value: impl Into<Value>, create_parents: bool) -> Self {
    Self::new(SubdocOp::DictUpsert, path, Some(value.into()), create_parents)
  }

  pub fn remove(path: impl Into<String>) -> Self {
    Self::new(SubdocOp::Delete, path, None, false)
  }

  pub fn array_prepend(path: impl Into<String>, value: impl Into<Value>, create_parents: bool) -> Self {
    Self::new(SubdocOp::ArrayPushFirst, path, Some(value.into()), create_parents)
  }

  pub fn array_append(path: impl Into<String>, value: impl Into<Value>, create_parents: bool) -> Self {
    Self::new(SubdocOp::ArrayPushLast, path, Some(value.into()), create_parents)
  }

  /// Insert into an array; the path must end with an index, e.g. `tags[1]`.
  pub fn array_insert(path: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::new(SubdocOp::ArrayInsert, path, Some(value.into()), false)
  }

  pub fn array_add_unique(path: impl Into<String>, value: impl Into<Value>, create_parents: bool) -> Self {
    Self::new(SubdocOp::ArrayAddUnique, path, Some(value.into()), create_parents)
  }

  pub fn counter(path: impl Into<String>, delta: i64, create_parents: bool) -> Self {
    Self::new(SubdocOp::Counter, path, Some(Value::from(delta)), create_parents)
  }
}

/// Position of a mutation in a partition's history, used for `at_plus`
/// scan consistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationToken {
  pub bucket: String,
  pub vbucket_id: u16,
  pub vbucket_uuid: u64,
  pub sequence_number: u64,
}

/// Sub-document request handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdocRequest {
  pub bucket: String,
  pub document_id: String,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub cas: Option<u64>,
  #[serde(skip_serializing_if = "is_zero", default)]
  pub expiry: u32,
  #[serde(flatten)]
  pub command: SubdocCommand,
}

fn is_zero(v: &u32) -> bool {
  *v == 0
}

/// Single-path requests skip the multi-path envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubdocCommand {
  Lookup { spec: LookupSpec },
  MultiLookup { specs: Vec<LookupSpec> },
  Mutation { spec: MutationSpec },
  MultiMutation { specs: Vec<MutationSpec> },
}

/// Raw sub-document response from the transport
#[derive(Debug, Clone)]
pub struct SubdocResponse {
  pub status: ResponseStatus,
  pub cas: u64,
  pub mutation_token: Option<MutationToken>,
  /// Content of a single-path response.
  pub content: Option<Bytes>,
  /// Per-path entries of a multi-path response.
  pub results: Vec<PathResponse>,
}

impl SubdocResponse {
  pub fn single(status: ResponseStatus, cas: u64, content: Option<Bytes>) -> Self {
    Self {
      status,
      cas,
      mutation_token: None,
      content,
      results: Vec::new(),
    }
  }

  pub fn multi(status: ResponseStatus, cas: u64, results: Vec<PathResponse>) -> Self {
    Self {
      status,
      cas,
      mutation_token: None,
      content: None,
      results,
    }
  }
}

/// One path's entry in a multi-path response
#[derive(Debug, Clone)]
pub struct PathResponse {
  pub path: String,
  pub op: SubdocOp,
  pub status: ResponseStatus,
  pub value: Option<Bytes>,
}
