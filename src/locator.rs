//! Key to node location
//!
//! Couchbase buckets hash keys into a fixed number of partitions with CRC32
//! and look the owner up in the partition map. Memcached buckets have no
//! partitions; keys are placed on a ketama ring built from MD5 digests.
//!
//! Everything here is a pure function of one [`Topology`] snapshot. Callers
//! that share a topology with a config watcher go through [`TopologyHandle`],
//! which hands out one `Arc` per locate call so a concurrent swap can never
//! mix two revisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use md5::{Digest, Md5};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::protocol::{PARTITION_NOT_EXISTENT, PARTITION_UNASSIGNED};

/// Ring points contributed by each node (40 digests, 4 points each).
const KETAMA_POINTS_PER_NODE: usize = 160;

/// Owners of one partition: the active node index followed by replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
  pub master: i16,
  pub replicas: Vec<i16>,
}

impl Partition {
  pub fn new(master: i16, replicas: Vec<i16>) -> Self {
    Self { master, replicas }
  }

  /// Node index of replica `ordinal` (1-based), or the not-existent sentinel.
  pub fn replica(&self, ordinal: u16) -> i16 {
    match ordinal.checked_sub(1) {
      Some(i) => self.replicas.get(i as usize).copied().unwrap_or(PARTITION_NOT_EXISTENT),
      None => PARTITION_NOT_EXISTENT,
    }
  }
}

/// Sorted map from ring position to node index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KetamaRing {
  points: BTreeMap<u32, usize>,
}

impl KetamaRing {
  pub fn from_points(points: BTreeMap<u32, usize>) -> Self {
    Self { points }
  }

  /// Build the ring for a node list, hashing `"<host>-<i>"` for each node.
  pub fn from_nodes(nodes: &[String]) -> Self {
    let mut points = BTreeMap::new();
    for (index, node) in nodes.iter().enumerate() {
      for i in 0..KETAMA_POINTS_PER_NODE / 4 {
        let digest = Md5::digest(format!("{}-{}", node, i).as_bytes());
        for h in 0..4 {
          let b = &digest[h * 4..h * 4 + 4];
          let point = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
          points.insert(point, index);
        }
      }
    }
    Self { points }
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Node owning `hash`: the exact point, else the next larger one, wrapping
  /// around to the smallest.
  pub fn node_for(&self, hash: u32) -> Option<usize> {
    self
      .points
      .range(hash..)
      .next()
      .or_else(|| self.points.iter().next())
      .map(|(_, node)| *node)
  }
}

/// Bucket flavour and its key distribution data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketKind {
  Couchbase { partitions: Vec<Partition>, num_replicas: u16 },
  Memcached { ring: KetamaRing },
  Other(String),
}

impl BucketKind {
  fn name(&self) -> &str {
    match self {
      BucketKind::Couchbase { .. } => "couchbase",
      BucketKind::Memcached { .. } => "memcached",
      BucketKind::Other(name) => name,
    }
  }
}

/// Read-only view of a bucket's cluster layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
  pub revision: u64,
  pub nodes: Vec<String>,
  pub kind: BucketKind,
}

impl Topology {
  pub fn couchbase(nodes: Vec<String>, partitions: Vec<Partition>, num_replicas: u16) -> Self {
    Self {
      revision: 0,
      nodes,
      kind: BucketKind::Couchbase {
        partitions,
        num_replicas,
      },
    }
  }

  pub fn memcached(nodes: Vec<String>) -> Self {
    let ring = KetamaRing::from_nodes(&nodes);
    Self {
      revision: 0,
      nodes,
      kind: BucketKind::Memcached { ring },
    }
  }

  pub fn num_replicas(&self) -> u16 {
    match &self.kind {
      BucketKind::Couchbase { num_replicas, .. } => *num_replicas,
      _ => 0,
    }
  }

  fn hostname(&self, index: i16) -> Result<&str> {
    usize::try_from(index)
      .ok()
      .and_then(|i| self.nodes.get(i))
      .map(String::as_str)
      .ok_or_else(|| Error::Protocol(format!("node index {} is not in the node list", index)))
  }
}

/// Partition a key belongs to.
///
/// `partitions` must be a non-zero power of two; other counts are rejected
/// by the `locate_*` functions before they get here.
pub fn partition_for(key: &[u8], partitions: usize) -> u16 {
  debug_assert!(partitions.is_power_of_two(), "partition count {} is not a power of two", partitions);
  let crc = crc32fast::hash(key);
  (((crc >> 16) & 0x7fff) as usize & (partitions - 1)) as u16
}

/// Ketama position of a key: the first four MD5 bytes, little-endian.
pub fn ketama_hash(key: &[u8]) -> u32 {
  let digest = Md5::digest(key);
  u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn couchbase_partition<'a>(key: &[u8], partitions: &'a [Partition]) -> Result<(u16, &'a Partition)> {
  if partitions.is_empty() || !partitions.len().is_power_of_two() {
    return Err(Error::Protocol(format!(
      "partition count {} is not a power of two",
      partitions.len()
    )));
  }
  let id = partition_for(key, partitions.len());
  Ok((id, &partitions[id as usize]))
}

/// Node serving the active copy of `key`.
pub fn locate_active<'a>(key: &[u8], topology: &'a Topology) -> Result<&'a str> {
  let host = match &topology.kind {
    BucketKind::Couchbase { partitions, .. } => {
      let (id, partition) = couchbase_partition(key, partitions)?;
      if partition.master == PARTITION_UNASSIGNED {
        return Err(Error::UnassignedPartition(id));
      }
      topology.hostname(partition.master)?
    }
    BucketKind::Memcached { ring } => {
      let node = ring
        .node_for(ketama_hash(key))
        .ok_or_else(|| Error::Protocol("ketama ring is empty".to_string()))?;
      topology
        .nodes
        .get(node)
        .map(String::as_str)
        .ok_or_else(|| Error::Protocol(format!("ring node {} is not in the node list", node)))?
    }
    BucketKind::Other(name) => return Err(Error::UnsupportedBucketType(name.clone())),
  };
  tracing::trace!(host, "located active node");
  Ok(host)
}

/// Node serving replica `ordinal` (1-based) of `key`.
pub fn locate_replica<'a>(key: &[u8], topology: &'a Topology, ordinal: u16) -> Result<&'a str> {
  let BucketKind::Couchbase { partitions, .. } = &topology.kind else {
    return Err(Error::UnsupportedBucketType(format!(
      "{} buckets have no replicas",
      topology.kind.name()
    )));
  };
  let (id, partition) = couchbase_partition(key, partitions)?;
  match partition.replica(ordinal) {
    PARTITION_NOT_EXISTENT => Err(Error::NoReplicaConfigured(ordinal)),
    PARTITION_UNASSIGNED => Err(Error::UnassignedPartition(id)),
    index => topology.hostname(index),
  }
}

/// Nodes for every configured replica of `key`, in ordinal order.
pub fn locate_all_replicas<'a>(key: &[u8], topology: &'a Topology) -> Result<Vec<&'a str>> {
  (1..=topology.num_replicas())
    .map(|ordinal| locate_replica(key, topology, ordinal))
    .collect()
}

/// Shared, swappable topology reference
#[derive(Debug, Clone)]
pub struct TopologyHandle {
  current: Arc<RwLock<Arc<Topology>>>,
}

impl TopologyHandle {
  pub fn new(topology: Topology) -> Self {
    Self {
      current: Arc::new(RwLock::new(Arc::new(topology))),
    }
  }

  pub fn snapshot(&self) -> Arc<Topology> {
    Arc::clone(&self.current.read())
  }

  /// Install a newer topology. Older revisions are ignored.
  pub fn update(&self, topology: Topology) -> bool {
    let mut current = self.current.write();
    if topology.revision < current.revision {
      return false;
    }
    *current = Arc::new(topology);
    true
  }

  pub fn locate_active(&self, key: &str) -> Result<String> {
    let topology = self.snapshot();
    locate_active(key.as_bytes(), &topology).map(str::to_string)
  }

  pub fn locate_replica(&self, key: &str, ordinal: u16) -> Result<String> {
    let topology = self.snapshot();
    locate_replica(key.as_bytes(), &topology, ordinal).map(str::to_string)
  }

  pub fn locate_all_replicas(&self, key: &str) -> Result<Vec<String>> {
    let topology = self.snapshot();
    let hosts = locate_all_replicas(key.as_bytes(), &topology)?;
    Ok(hosts.into_iter().map(str::to_string).collect())
  }
}
