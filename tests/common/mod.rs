//! In-memory transports shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use couchbase_client::{
  BufferedSections, MutationSpec, PathResponse, QueryResponse, QueryTransport, ResponseStatus,
  Result, SubdocCommand, SubdocOp, SubdocRequest, SubdocResponse, SubdocTransport,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Key-value store with sub-document path support
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
  Key(String),
  Index(i64),
}

/// Parse `a.b[2].c`; `None` for malformed paths.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
  let mut segments = Vec::new();
  if path.is_empty() {
    return Some(segments);
  }
  for part in path.split('.') {
    let (key, mut rest) = match part.find('[') {
      Some(i) => (&part[..i], &part[i..]),
      None => (part, ""),
    };
    if !key.is_empty() {
      segments.push(Segment::Key(key.to_string()));
    } else if rest.is_empty() {
      return None;
    }
    while !rest.is_empty() {
      let close = rest.find(']')?;
      if !rest.starts_with('[') {
        return None;
      }
      segments.push(Segment::Index(rest[1..close].parse().ok()?));
      rest = &rest[close + 1..];
    }
  }
  Some(segments)
}

fn array_index(index: i64, len: usize) -> Option<usize> {
  if index < 0 {
    len.checked_sub(index.unsigned_abs() as usize)
  } else if (index as usize) < len {
    Some(index as usize)
  } else {
    None
  }
}

fn resolve<'a>(mut current: &'a Value, segments: &[Segment]) -> std::result::Result<&'a Value, ResponseStatus> {
  for segment in segments {
    current = match (segment, current) {
      (Segment::Key(k), Value::Object(map)) => map.get(k).ok_or(ResponseStatus::SubdocPathNotFound)?,
      (Segment::Index(i), Value::Array(items)) => {
        let idx = array_index(*i, items.len()).ok_or(ResponseStatus::SubdocPathNotFound)?;
        &items[idx]
      }
      _ => return Err(ResponseStatus::SubdocPathMismatch),
    };
  }
  Ok(current)
}

fn resolve_mut<'a>(
  mut current: &'a mut Value,
  segments: &[Segment],
  create: bool,
) -> std::result::Result<&'a mut Value, ResponseStatus> {
  for segment in segments {
    current = match (segment, current) {
      (Segment::Key(k), Value::Object(map)) => {
        if create {
          map.entry(k.clone()).or_insert_with(|| json!({}))
        } else {
          map.get_mut(k).ok_or(ResponseStatus::SubdocPathNotFound)?
        }
      }
      (Segment::Index(i), Value::Array(items)) => {
        let idx = array_index(*i, items.len()).ok_or(ResponseStatus::SubdocPathNotFound)?;
        &mut items[idx]
      }
      _ => return Err(ResponseStatus::SubdocPathMismatch),
    };
  }
  Ok(current)
}

/// Apply one mutation in place, returning the counter result if any.
fn apply(doc: &mut Value, spec: &MutationSpec) -> std::result::Result<Option<Value>, ResponseStatus> {
  let segments = parse_path(&spec.path).ok_or(ResponseStatus::SubdocPathInvalid)?;
  let value = spec.value.clone().unwrap_or(Value::Null);
  match spec.op {
    SubdocOp::DictAdd | SubdocOp::DictUpsert | SubdocOp::Replace | SubdocOp::Delete => {
      let (last, parents) = segments.split_last().ok_or(ResponseStatus::SubdocPathInvalid)?;
      let parent = resolve_mut(doc, parents, spec.create_parents)?;
      match (last, parent) {
        (Segment::Key(k), Value::Object(map)) => match spec.op {
          SubdocOp::DictAdd if map.contains_key(k) => Err(ResponseStatus::SubdocPathExists),
          SubdocOp::Replace | SubdocOp::Delete if !map.contains_key(k) => {
            Err(ResponseStatus::SubdocPathNotFound)
          }
          SubdocOp::Delete => {
            map.remove(k);
            Ok(None)
          }
          _ => {
            map.insert(k.clone(), value);
            Ok(None)
          }
        },
        (Segment::Index(i), Value::Array(items)) => {
          let idx = array_index(*i, items.len()).ok_or(ResponseStatus::SubdocPathNotFound)?;
          match spec.op {
            SubdocOp::Replace => items[idx] = value,
            SubdocOp::Delete => {
              items.remove(idx);
            }
            _ => return Err(ResponseStatus::SubdocPathInvalid),
          }
          Ok(None)
        }
        _ => Err(ResponseStatus::SubdocPathMismatch),
      }
    }
    SubdocOp::ArrayPushFirst | SubdocOp::ArrayPushLast | SubdocOp::ArrayAddUnique => {
      let target = if spec.create_parents {
        let (last, parents) = match segments.split_last() {
          Some(split) => split,
          None => return push(doc, spec.op, value),
        };
        let parent = resolve_mut(doc, parents, true)?;
        match (last, parent) {
          (Segment::Key(k), Value::Object(map)) => map.entry(k.clone()).or_insert_with(|| json!([])),
          _ => return Err(ResponseStatus::SubdocPathMismatch),
        }
      } else {
        resolve_mut(doc, &segments, false)?
      };
      push(target, spec.op, value)
    }
    SubdocOp::ArrayInsert => {
      let (last, parents) = segments.split_last().ok_or(ResponseStatus::SubdocPathInvalid)?;
      let Segment::Index(i) = last else {
        return Err(ResponseStatus::SubdocPathInvalid);
      };
      match resolve_mut(doc, parents, false)? {
        Value::Array(items) if *i >= 0 && (*i as usize) <= items.len() => {
          items.insert(*i as usize, value);
          Ok(None)
        }
        Value::Array(_) => Err(ResponseStatus::SubdocPathNotFound),
        _ => Err(ResponseStatus::SubdocPathMismatch),
      }
    }
    SubdocOp::Counter => {
      let delta = value.as_i64().ok_or(ResponseStatus::SubdocDeltaRange)?;
      let (last, parents) = segments.split_last().ok_or(ResponseStatus::SubdocPathInvalid)?;
      let parent = resolve_mut(doc, parents, spec.create_parents)?;
      let Value::Object(map) = parent else {
        return Err(ResponseStatus::SubdocPathMismatch);
      };
      let Segment::Key(k) = last else {
        return Err(ResponseStatus::SubdocPathInvalid);
      };
      let current = match map.get(k) {
        None => 0,
        Some(v) => v.as_i64().ok_or(ResponseStatus::SubdocPathMismatch)?,
      };
      let next = current.checked_add(delta).ok_or(ResponseStatus::SubdocNumRange)?;
      map.insert(k.clone(), json!(next));
      Ok(Some(json!(next)))
    }
    SubdocOp::Get | SubdocOp::Exists => Err(ResponseStatus::SubdocInvalidCombo),
  }
}

fn push(target: &mut Value, op: SubdocOp, value: Value) -> std::result::Result<Option<Value>, ResponseStatus> {
  let Value::Array(items) = target else {
    return Err(ResponseStatus::SubdocPathMismatch);
  };
  match op {
    SubdocOp::ArrayPushFirst => items.insert(0, value),
    SubdocOp::ArrayAddUnique if items.contains(&value) => return Err(ResponseStatus::SubdocPathExists),
    _ => items.push(value),
  }
  Ok(None)
}

struct Stored {
  body: Value,
  cas: u64,
}

/// Sub-document transport backed by a map of JSON documents
#[derive(Default)]
pub struct MockKv {
  docs: Mutex<HashMap<String, Stored>>,
  corrupt: Mutex<HashSet<String>>,
  pub requests: Mutex<Vec<SubdocRequest>>,
}

impl MockKv {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_doc(self, id: &str, body: Value) -> Self {
    self.docs.lock().unwrap().insert(id.to_string(), Stored { body, cas: 1 });
    self
  }

  /// Paths whose content is returned as invalid JSON.
  pub fn corrupt_path(self, path: &str) -> Self {
    self.corrupt.lock().unwrap().insert(path.to_string());
    self
  }

  pub fn doc(&self, id: &str) -> Option<Value> {
    self.docs.lock().unwrap().get(id).map(|s| s.body.clone())
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  fn lookup(&self, doc: &Value, op: SubdocOp, path: &str) -> (ResponseStatus, Option<Bytes>) {
    let Some(segments) = parse_path(path) else {
      return (ResponseStatus::SubdocPathInvalid, None);
    };
    match resolve(doc, &segments) {
      Ok(_) if op == SubdocOp::Exists => (ResponseStatus::Success, None),
      Ok(_) if self.corrupt.lock().unwrap().contains(path) => {
        (ResponseStatus::Success, Some(Bytes::from_static(b"{not json")))
      }
      Ok(value) => (
        ResponseStatus::Success,
        Some(Bytes::from(serde_json::to_vec(value).unwrap())),
      ),
      Err(status) => (status, None),
    }
  }
}

#[async_trait]
impl SubdocTransport for MockKv {
  async fn send_subdoc(&self, request: SubdocRequest) -> Result<SubdocResponse> {
    self.requests.lock().unwrap().push(request.clone());
    let mut docs = self.docs.lock().unwrap();
    let Some(stored) = docs.get_mut(&request.document_id) else {
      return Ok(SubdocResponse::single(ResponseStatus::NotFound, 0, None));
    };
    if request.cas.is_some_and(|cas| cas != stored.cas) {
      return Ok(SubdocResponse::single(ResponseStatus::Exists, 0, None));
    }

    match request.command {
      SubdocCommand::Lookup { spec } => {
        let (status, content) = self.lookup(&stored.body, spec.op, &spec.path);
        Ok(SubdocResponse::single(status, stored.cas, content))
      }
      SubdocCommand::MultiLookup { specs } => {
        let results: Vec<PathResponse> = specs
          .iter()
          .map(|spec| {
            let (status, value) = self.lookup(&stored.body, spec.op, &spec.path);
            PathResponse {
              path: spec.path.clone(),
              op: spec.op,
              status,
              value,
            }
          })
          .collect();
        let status = if results.iter().all(|r| r.status.is_success()) {
          ResponseStatus::Success
        } else {
          ResponseStatus::SubdocMultiPathFailure
        };
        Ok(SubdocResponse::multi(status, stored.cas, results))
      }
      SubdocCommand::Mutation { spec } => {
        let mut draft = stored.body.clone();
        match apply(&mut draft, &spec) {
          Ok(value) => {
            stored.body = draft;
            stored.cas += 1;
            let content = value.map(|v| Bytes::from(serde_json::to_vec(&v).unwrap()));
            Ok(SubdocResponse::single(ResponseStatus::Success, stored.cas, content))
          }
          Err(status) => Ok(SubdocResponse::single(status, stored.cas, None)),
        }
      }
      SubdocCommand::MultiMutation { specs } => {
        let mut draft = stored.body.clone();
        let mut results = Vec::with_capacity(specs.len());
        for spec in &specs {
          match apply(&mut draft, spec) {
            Ok(value) => results.push(PathResponse {
              path: spec.path.clone(),
              op: spec.op,
              status: ResponseStatus::Success,
              value: value.map(|v| Bytes::from(serde_json::to_vec(&v).unwrap())),
            }),
            Err(status) => {
              let failed = PathResponse {
                path: spec.path.clone(),
                op: spec.op,
                status,
                value: None,
              };
              return Ok(SubdocResponse::multi(
                ResponseStatus::SubdocMultiPathFailure,
                stored.cas,
                vec![failed],
              ));
            }
          }
        }
        stored.body = draft;
        stored.cas += 1;
        Ok(SubdocResponse::multi(ResponseStatus::Success, stored.cas, results))
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Query service
// ---------------------------------------------------------------------------

/// Canned reply for one dispatched query body
#[derive(Debug, Clone, Default)]
pub struct Reply {
  pub parse_success: bool,
  pub rows: Vec<Bytes>,
  pub errors: Vec<Value>,
  pub status: String,
}

impl Reply {
  pub fn rows(rows: Vec<Value>) -> Self {
    Self {
      parse_success: true,
      rows: rows.iter().map(|r| Bytes::from(serde_json::to_vec(r).unwrap())).collect(),
      errors: Vec::new(),
      status: "success".to_string(),
    }
  }

  /// Rows sent verbatim, valid JSON or not.
  pub fn raw_rows(rows: &[&'static str]) -> Self {
    Self {
      rows: rows.iter().map(|r| Bytes::from_static(r.as_bytes())).collect(),
      ..Self::rows(Vec::new())
    }
  }

  pub fn errors(parse_success: bool, errors: Vec<Value>) -> Self {
    Self {
      parse_success,
      rows: Vec::new(),
      errors,
      status: "fatal".to_string(),
    }
  }

  pub fn plan(name: &str) -> Self {
    Self::rows(vec![json!({
      "name": name,
      "encoded_plan": format!("encoded-{}", name),
      "operator": {"#operator": "Sequence"},
    })])
  }
}

type Handler = Box<dyn Fn(&Value, usize) -> Reply + Send + Sync>;

/// Query transport answering through a handler and recording every body
pub struct MockQuery {
  handler: Handler,
  pub bodies: Mutex<Vec<Value>>,
  prepares: AtomicUsize,
}

impl MockQuery {
  /// `handler` gets the body and how many `PREPARE`s were seen before it.
  pub fn new(handler: impl Fn(&Value, usize) -> Reply + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      bodies: Mutex::new(Vec::new()),
      prepares: AtomicUsize::new(0),
    }
  }

  /// Prepares succeed with plan `p<n>`; executions return `rows`.
  pub fn serving(rows: Vec<Value>) -> Self {
    Self::new(move |body, prepares| {
      if is_prepare(body) {
        Reply::plan(&format!("p{}", prepares + 1))
      } else {
        Reply::rows(rows.clone())
      }
    })
  }

  pub fn prepare_count(&self) -> usize {
    self.prepares.load(Ordering::SeqCst)
  }

  pub fn bodies(&self) -> Vec<Value> {
    self.bodies.lock().unwrap().clone()
  }
}

pub fn is_prepare(body: &Value) -> bool {
  body["statement"].as_str().is_some_and(|s| s.starts_with("PREPARE "))
}

#[async_trait]
impl QueryTransport for MockQuery {
  async fn send_query(&self, body: Value) -> Result<QueryResponse> {
    self.bodies.lock().unwrap().push(body.clone());
    let prepares = if is_prepare(&body) {
      self.prepares.fetch_add(1, Ordering::SeqCst)
    } else {
      self.prepares.load(Ordering::SeqCst)
    };
    let reply = (self.handler)(&body, prepares);
    let context_id = body["client_context_id"].as_str().unwrap_or_default().to_string();
    let sections = BufferedSections {
      rows: reply.rows,
      signature: vec![Bytes::from_static(br#"{"*":"*"}"#)],
      errors: reply
        .errors
        .iter()
        .map(|e| Bytes::from(serde_json::to_vec(e).unwrap()))
        .collect(),
      metrics: vec![Bytes::from_static(br#"{"elapsedTime":"2ms","resultCount":1}"#)],
      status: reply.status,
    };
    Ok(QueryResponse::buffered(reply.parse_success, "req-1", context_id, sections))
  }
}
