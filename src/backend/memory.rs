//! In-memory LRU cache engine

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{glob_to_regex, paginate, spawn_sweeper, CacheBackend, Sweeper};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::value::{CacheValue, KeysPage, TtlState};

/// One stored entry: the value plus its absolute expiry
struct StoredEntry {
  value: CacheValue,
  expires_at: Option<Instant>,
}

impl StoredEntry {
  fn is_expired(&self) -> bool {
    self.expires_at.is_some_and(|at| Instant::now() > at)
  }
}

/// Diagnostic counters
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
  pub keys: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub expired: u64,
}

/// In-memory cache with LRU eviction and lazy TTL expiry.
///
/// One mutex guards the whole map; every operation completes without
/// suspending, so the async surface exists only to satisfy the backend
/// contract. Expired entries are dropped lazily on access and in bulk
/// by a background sweeper.
pub struct MemoryBackend {
  entries: Mutex<LruCache<String, StoredEntry>>,
  max_size: usize,
  hits: AtomicU64,
  misses: AtomicU64,
  evictions: AtomicU64,
  expired: AtomicU64,
  sweeper: Mutex<Option<Sweeper>>,
}

impl std::fmt::Debug for MemoryBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryBackend")
      .field("max_size", &self.max_size)
      .finish_non_exhaustive()
  }
}

impl MemoryBackend {
  /// Create the engine and start its expiry sweeper.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn new(config: MemoryConfig) -> Arc<Self> {
    // the LRU map rejects a zero capacity; with max_size 0 every set is
    // refused up front, so the single slot is never used
    let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
    let backend = Arc::new(Self {
      entries: Mutex::new(LruCache::new(capacity)),
      max_size: config.max_size,
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      evictions: AtomicU64::new(0),
      expired: AtomicU64::new(0),
      sweeper: Mutex::new(None),
    });
    let every = Duration::from_secs(config.cleanup_interval_secs.max(1));
    let sweeper = spawn_sweeper(Arc::downgrade(&backend), every, |backend| async move {
      backend.sweep_expired()
    });
    *backend.sweeper.lock() = Some(sweeper);
    backend
  }

  /// Drop every expired entry, returning how many were removed.
  /// Bounds memory growth from write-only keys that are never read.
  pub fn sweep_expired(&self) -> usize {
    let mut entries = self.entries.lock();
    let dead: Vec<String> = entries
      .iter()
      .filter(|(_, entry)| entry.is_expired())
      .map(|(key, _)| key.clone())
      .collect();
    for key in &dead {
      entries.pop(key.as_str());
    }
    self.expired.fetch_add(dead.len() as u64, Ordering::Relaxed);
    dead.len()
  }

  /// Snapshot the diagnostic counters
  pub fn stats(&self) -> MemoryStats {
    let keys = {
      let entries = self.entries.lock();
      entries.iter().filter(|(_, entry)| !entry.is_expired()).count()
    };
    MemoryStats {
      keys,
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
    }
  }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
  async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
    let mut entries = self.entries.lock();
    let expired = match entries.peek(key) {
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        return Ok(None);
      }
      Some(entry) => entry.is_expired(),
    };
    if expired {
      entries.pop(key);
      self.expired.fetch_add(1, Ordering::Relaxed);
      self.misses.fetch_add(1, Ordering::Relaxed);
      return Ok(None);
    }
    self.hits.fetch_add(1, Ordering::Relaxed);
    // get refreshes the entry's LRU position
    Ok(entries.get(key).map(|entry| entry.value.clone()))
  }

  async fn set(
    &self,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
    nx: bool,
  ) -> Result<bool> {
    if self.max_size == 0 {
      return Ok(false);
    }
    let mut entries = self.entries.lock();
    if nx {
      match entries.peek(key) {
        Some(entry) if !entry.is_expired() => return Ok(false),
        Some(_) => {
          // an expired remnant does not block an NX write
          entries.pop(key);
        }
        None => {}
      }
    }
    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
    // inserting a new key at capacity evicts the LRU end; updating an
    // existing key replaces in place and never evicts
    let evicting = entries.len() == self.max_size && !entries.contains(key);
    entries.put(key.to_string(), StoredEntry { value, expires_at });
    if evicting {
      self.evictions.fetch_add(1, Ordering::Relaxed);
    }
    Ok(true)
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    let mut entries = self.entries.lock();
    Ok(entries.pop(key).is_some_and(|entry| !entry.is_expired()))
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    let entries = self.entries.lock();
    Ok(entries.peek(key).is_some_and(|entry| !entry.is_expired()))
  }

  async fn clear(&self) -> Result<()> {
    self.entries.lock().clear();
    Ok(())
  }

  async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
    let mut entries = self.entries.lock();
    let mut found = HashMap::new();
    for key in keys {
      let expired = match entries.peek(key.as_str()) {
        None => {
          self.misses.fetch_add(1, Ordering::Relaxed);
          continue;
        }
        Some(entry) => entry.is_expired(),
      };
      if expired {
        entries.pop(key.as_str());
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        continue;
      }
      if let Some(entry) = entries.get(key.as_str()) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        found.insert(key.clone(), entry.value.clone());
      }
    }
    Ok(found)
  }

  async fn set_many(
    &self,
    mapping: &HashMap<String, CacheValue>,
    ttl: Option<Duration>,
  ) -> Result<()> {
    if self.max_size == 0 {
      return Ok(());
    }
    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
    let mut entries = self.entries.lock();
    for (key, value) in mapping {
      let evicting = entries.len() == self.max_size && !entries.contains(key.as_str());
      entries.put(
        key.clone(),
        StoredEntry {
          value: value.clone(),
          expires_at,
        },
      );
      if evicting {
        self.evictions.fetch_add(1, Ordering::Relaxed);
      }
    }
    Ok(())
  }

  async fn delete_many(&self, keys: &[String]) -> Result<usize> {
    let mut entries = self.entries.lock();
    let mut removed = 0;
    for key in keys {
      if entries
        .pop(key.as_str())
        .is_some_and(|entry| !entry.is_expired())
      {
        removed += 1;
      }
    }
    Ok(removed)
  }

  async fn keys(
    &self,
    pattern: &str,
    cursor: u64,
    count: usize,
    max_keys: Option<usize>,
  ) -> Result<KeysPage> {
    let regex = glob_to_regex(pattern);
    let matched: Vec<String> = {
      let entries = self.entries.lock();
      entries
        .iter()
        .filter(|(key, entry)| !entry.is_expired() && regex.is_match(key))
        .map(|(key, _)| key.clone())
        .collect()
    };
    Ok(paginate(matched, cursor, count, max_keys))
  }

  async fn ttl(&self, key: &str) -> Result<TtlState> {
    let entries = self.entries.lock();
    let Some(entry) = entries.peek(key) else {
      return Ok(TtlState::Missing);
    };
    match entry.expires_at {
      None => Ok(TtlState::Persistent),
      Some(at) => {
        let now = Instant::now();
        if now >= at {
          Ok(TtlState::Missing)
        } else {
          Ok(TtlState::Expires(at - now))
        }
      }
    }
  }

  async fn close(&self) -> Result<()> {
    let sweeper = self.sweeper.lock().take();
    if let Some(sweeper) = sweeper {
      sweeper.stop().await;
    }
    Ok(())
  }
}
