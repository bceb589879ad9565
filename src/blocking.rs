//! Blocking calling convention over the async contract

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

use crate::backend::CacheBackend;
use crate::config::BackendConfig;
use crate::error::{CacheError, Result};
use crate::lock::DistributedLock;
use crate::registry::BackendRegistry;
use crate::value::{CacheValue, KeysPage, TtlState};

/// Thread-blocking wrapper that owns a private runtime.
///
/// Engines and their background sweepers live on the owned runtime's
/// single worker thread, so they keep running between calls. Every
/// method parks the calling thread until the operation finishes.
/// Must not be used from inside another Tokio runtime.
pub struct BlockingCache {
  backend: Arc<dyn CacheBackend>,
  runtime: Runtime,
}

impl BlockingCache {
  /// Build a backend by registered name and wrap it
  pub fn open(registry: &BackendRegistry, name: &str, config: BackendConfig) -> Result<Self> {
    let runtime = new_runtime()?;
    let backend = runtime.block_on(registry.build(name, config))?;
    Ok(Self { backend, runtime })
  }

  /// The wrapped backend, for sharing with async callers
  pub fn backend(&self) -> Arc<dyn CacheBackend> {
    self.backend.clone()
  }

  pub fn get(&self, key: &str) -> Result<Option<CacheValue>> {
    self.runtime.block_on(self.backend.get(key))
  }

  pub fn set(
    &self,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
    nx: bool,
  ) -> Result<bool> {
    self.runtime.block_on(self.backend.set(key, value, ttl, nx))
  }

  pub fn delete(&self, key: &str) -> Result<bool> {
    self.runtime.block_on(self.backend.delete(key))
  }

  pub fn exists(&self, key: &str) -> Result<bool> {
    self.runtime.block_on(self.backend.exists(key))
  }

  pub fn clear(&self) -> Result<()> {
    self.runtime.block_on(self.backend.clear())
  }

  pub fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
    self.runtime.block_on(self.backend.get_many(keys))
  }

  pub fn set_many(
    &self,
    mapping: &HashMap<String, CacheValue>,
    ttl: Option<Duration>,
  ) -> Result<()> {
    self.runtime.block_on(self.backend.set_many(mapping, ttl))
  }

  pub fn delete_many(&self, keys: &[String]) -> Result<usize> {
    self.runtime.block_on(self.backend.delete_many(keys))
  }

  pub fn keys(
    &self,
    pattern: &str,
    cursor: u64,
    count: usize,
    max_keys: Option<usize>,
  ) -> Result<KeysPage> {
    self
      .runtime
      .block_on(self.backend.keys(pattern, cursor, count, max_keys))
  }

  pub fn ttl(&self, key: &str) -> Result<TtlState> {
    self.runtime.block_on(self.backend.ttl(key))
  }

  pub fn check_health(&self) -> bool {
    self.runtime.block_on(self.backend.check_health())
  }

  pub fn close(&self) -> Result<()> {
    self.runtime.block_on(self.backend.close())
  }

  /// Create a lock driven by this cache's runtime
  pub fn lock(&self, name: &str, timeout: Duration) -> BlockingLock<'_> {
    BlockingLock {
      lock: DistributedLock::new(self.backend.clone(), name, timeout),
      cache: self,
    }
  }
}

/// Blocking view of a distributed lock
pub struct BlockingLock<'a> {
  lock: DistributedLock,
  cache: &'a BlockingCache,
}

impl BlockingLock<'_> {
  pub fn try_acquire(&self) -> Result<bool> {
    self.cache.runtime.block_on(self.lock.try_acquire())
  }

  pub fn acquire(&self) -> Result<()> {
    self.cache.runtime.block_on(self.lock.acquire())
  }

  pub fn acquire_timeout(&self, wait: Duration) -> Result<bool> {
    self.cache.runtime.block_on(self.lock.acquire_timeout(wait))
  }

  pub fn release(&self) -> Result<()> {
    self.cache.runtime.block_on(self.lock.release())
  }

  pub fn is_held(&self) -> bool {
    self.lock.is_held()
  }
}

fn new_runtime() -> Result<Runtime> {
  Builder::new_multi_thread()
    .worker_threads(1)
    .enable_all()
    .build()
    .map_err(|e| CacheError::Backend(e.to_string()))
}
