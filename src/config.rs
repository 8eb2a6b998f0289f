//! Client configuration.

use std::time::Duration;

use crate::cache::DEFAULT_PLAN_CACHE_CAPACITY;

/// Username/password pair used for query credentials and HTTP auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl Credentials {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }
}

/// Retry settings applied to queries and lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(10),
      max_delay: Duration::from_secs(1),
    }
  }
}

/// Client options
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
  pub credentials: Option<Credentials>,
  pub query_timeout: Duration,
  pub kv_timeout: Duration,
  pub plan_cache_capacity: usize,
  pub retry: RetryConfig,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      credentials: None,
      query_timeout: Duration::from_secs(75),
      kv_timeout: Duration::from_millis(2500),
      plan_cache_capacity: DEFAULT_PLAN_CACHE_CAPACITY,
      retry: RetryConfig::default(),
    }
  }
}

impl ClientConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
    self.credentials = Some(Credentials::new(username, password));
    self
  }

  pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
    self.query_timeout = timeout;
    self
  }

  pub fn with_kv_timeout(mut self, timeout: Duration) -> Self {
    self.kv_timeout = timeout;
    self
  }

  pub fn with_plan_cache_capacity(mut self, capacity: usize) -> Self {
    self.plan_cache_capacity = capacity;
    self
  }

  pub fn with_retry(mut self, retry: RetryConfig) -> Self {
    self.retry = retry;
    self
  }
}
