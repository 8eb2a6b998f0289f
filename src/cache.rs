//! Prepared plan cache
//!
//! A bounded, access-ordered map from statement text to the plan the query
//! service prepared for it. Lookups and inserts both refresh recency; once
//! the cache is full the least recently touched plan is dropped.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default number of plans kept per executor
pub const DEFAULT_PLAN_CACHE_CAPACITY: usize = 5000;

/// A plan returned by `PREPARE`, keyed by the statement it was prepared from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedPlan {
  pub statement: String,
  pub name: String,
  pub encoded_plan: String,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub size: usize,
  pub capacity: usize,
}

pub struct PlanCache {
  plans: Mutex<LruCache<String, Arc<PreparedPlan>>>,
  capacity: usize,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl PlanCache {
  /// Create a cache holding at most `capacity` plans (at least one).
  pub fn new(capacity: usize) -> Self {
    let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      plans: Mutex::new(LruCache::new(cap)),
      capacity: cap.get(),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Look up the plan for a statement, marking it most recently used.
  pub fn get(&self, statement: &str) -> Option<Arc<PreparedPlan>> {
    let found = self.plans.lock().get(statement).cloned();
    let counter = if found.is_some() { &self.hits } else { &self.misses };
    counter.fetch_add(1, Ordering::Relaxed);
    found
  }

  /// Store a plan under its statement. Replaces any existing entry and
  /// evicts the least recently used plan when full.
  pub fn put(&self, plan: PreparedPlan) -> Arc<PreparedPlan> {
    let plan = Arc::new(plan);
    let evicted = self.plans.lock().push(plan.statement.clone(), Arc::clone(&plan));
    if let Some((statement, _)) = evicted {
      if statement != plan.statement {
        tracing::debug!(statement = %statement, "evicted prepared plan");
      }
    }
    plan
  }

  /// Membership test that leaves recency untouched.
  pub fn contains(&self, statement: &str) -> bool {
    self.plans.lock().contains(statement)
  }

  pub fn len(&self) -> usize {
    self.plans.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      size: self.len(),
      capacity: self.capacity,
    }
  }
}

impl Default for PlanCache {
  fn default() -> Self {
    Self::new(DEFAULT_PLAN_CACHE_CAPACITY)
  }
}
