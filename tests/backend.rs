//! Backend contract tests

use acorn_cache::{
  BackendConfig, BackendRegistry, BlockingCache, CacheBackend, CacheError, CacheValue,
  KeysPage, MemoryBackend, MemoryConfig, TtlState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn memory(max_size: usize) -> Arc<MemoryBackend> {
  MemoryBackend::new(MemoryConfig {
    max_size,
    cleanup_interval_secs: 60,
  })
}

// =============================================================================
// Contract semantics (memory engine)
// =============================================================================

#[tokio::test]
async fn ttl_correctness() {
  let backend = memory(100);

  backend
    .set("key", CacheValue::from("value"), Some(Duration::from_millis(80)), false)
    .await
    .unwrap();
  assert_eq!(backend.get("key").await.unwrap(), Some(CacheValue::from("value")));
  assert!(backend.exists("key").await.unwrap());

  tokio::time::sleep(Duration::from_millis(120)).await;

  assert_eq!(backend.get("key").await.unwrap(), None);
  assert!(!backend.exists("key").await.unwrap());
}

#[tokio::test]
async fn no_ttl_persistence() {
  let backend = memory(100);

  backend
    .set("stable", CacheValue::from(7), None, false)
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert_eq!(backend.get("stable").await.unwrap(), Some(CacheValue::from(7)));
  assert_eq!(backend.ttl("stable").await.unwrap(), TtlState::Persistent);
}

#[tokio::test]
async fn nx_semantics() {
  let backend = memory(100);

  assert!(backend
    .set("key", CacheValue::from("v1"), None, true)
    .await
    .unwrap());
  assert!(!backend
    .set("key", CacheValue::from("v2"), None, true)
    .await
    .unwrap());
  assert_eq!(backend.get("key").await.unwrap(), Some(CacheValue::from("v1")));
}

#[tokio::test]
async fn nx_ignores_expired_remnant() {
  let backend = memory(100);

  backend
    .set("key", CacheValue::from("old"), Some(Duration::from_millis(40)), false)
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(80)).await;

  assert!(backend
    .set("key", CacheValue::from("new"), None, true)
    .await
    .unwrap());
  assert_eq!(backend.get("key").await.unwrap(), Some(CacheValue::from("new")));
}

#[tokio::test]
async fn batch_omission() {
  let backend = memory(100);

  backend.set("k1", CacheValue::from("v1"), None, false).await.unwrap();
  backend.set("k2", CacheValue::from("v2"), None, false).await.unwrap();

  let found = backend
    .get_many(&["k1".to_string(), "k2".to_string(), "missing".to_string()])
    .await
    .unwrap();
  assert_eq!(found.len(), 2);
  assert_eq!(found.get("k1"), Some(&CacheValue::from("v1")));
  assert!(!found.contains_key("missing"));
}

#[tokio::test]
async fn batch_set_and_delete() {
  let backend = memory(100);

  let mut mapping = HashMap::new();
  mapping.insert("a".to_string(), CacheValue::from(1));
  mapping.insert("b".to_string(), CacheValue::from(2));
  backend.set_many(&mapping, None).await.unwrap();

  assert!(backend.exists("a").await.unwrap());
  assert!(backend.exists("b").await.unwrap());

  let removed = backend
    .delete_many(&["a".to_string(), "b".to_string(), "c".to_string()])
    .await
    .unwrap();
  assert_eq!(removed, 2);
}

#[tokio::test]
async fn ttl_states() {
  let backend = memory(100);

  assert_eq!(backend.ttl("missing").await.unwrap(), TtlState::Missing);

  backend.set("forever", CacheValue::Null, None, false).await.unwrap();
  assert_eq!(backend.ttl("forever").await.unwrap(), TtlState::Persistent);

  backend
    .set("mortal", CacheValue::Null, Some(Duration::from_secs(100)), false)
    .await
    .unwrap();
  match backend.ttl("mortal").await.unwrap() {
    TtlState::Expires(left) => assert!(left <= Duration::from_secs(100) && left > Duration::ZERO),
    other => panic!("unexpected ttl state: {:?}", other),
  }
}

#[tokio::test]
async fn capacity_zero_refuses_writes() {
  let backend = memory(0);

  assert!(!backend.set("key", CacheValue::from(1), None, false).await.unwrap());
  assert_eq!(backend.get("key").await.unwrap(), None);
}

#[tokio::test]
async fn health_check_round_trip() {
  let backend = memory(100);
  assert!(backend.check_health().await);
}

// =============================================================================
// Default batch methods (minimal backend relying on the trait defaults)
// =============================================================================

struct MapBackend {
  entries: Mutex<HashMap<String, (CacheValue, Option<Instant>)>>,
}

impl std::fmt::Debug for MapBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MapBackend").finish_non_exhaustive()
  }
}

impl MapBackend {
  fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

#[async_trait]
impl CacheBackend for MapBackend {
  async fn get(&self, key: &str) -> acorn_cache::Result<Option<CacheValue>> {
    let mut entries = self.entries.lock();
    let expired = matches!(entries.get(key), Some((_, Some(at))) if Instant::now() > *at);
    if expired {
      entries.remove(key);
      return Ok(None);
    }
    Ok(entries.get(key).map(|(value, _)| value.clone()))
  }

  async fn set(
    &self,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
    nx: bool,
  ) -> acorn_cache::Result<bool> {
    let mut entries = self.entries.lock();
    if nx && entries.contains_key(key) {
      return Ok(false);
    }
    entries.insert(key.to_string(), (value, ttl.map(|ttl| Instant::now() + ttl)));
    Ok(true)
  }

  async fn delete(&self, key: &str) -> acorn_cache::Result<bool> {
    Ok(self.entries.lock().remove(key).is_some())
  }

  async fn exists(&self, key: &str) -> acorn_cache::Result<bool> {
    Ok(self.entries.lock().contains_key(key))
  }

  async fn clear(&self) -> acorn_cache::Result<()> {
    self.entries.lock().clear();
    Ok(())
  }

  async fn keys(
    &self,
    _pattern: &str,
    _cursor: u64,
    _count: usize,
    _max_keys: Option<usize>,
  ) -> acorn_cache::Result<KeysPage> {
    Ok(KeysPage {
      keys: vec![],
      cursor: 0,
      has_more: false,
      total_scanned: 0,
    })
  }

  async fn ttl(&self, _key: &str) -> acorn_cache::Result<TtlState> {
    Ok(TtlState::Missing)
  }

  async fn close(&self) -> acorn_cache::Result<()> {
    Ok(())
  }
}

#[tokio::test]
async fn default_batches_loop_single_key_operations() {
  let backend = MapBackend::new();

  let mut mapping = HashMap::new();
  mapping.insert("x".to_string(), CacheValue::from("1"));
  mapping.insert("y".to_string(), CacheValue::from("2"));
  backend.set_many(&mapping, None).await.unwrap();

  let found = backend
    .get_many(&["x".to_string(), "y".to_string(), "z".to_string()])
    .await
    .unwrap();
  assert_eq!(found.len(), 2);

  let removed = backend
    .delete_many(&["x".to_string(), "z".to_string()])
    .await
    .unwrap();
  assert_eq!(removed, 1);
}

#[tokio::test]
async fn default_health_check() {
  let backend = MapBackend::new();
  assert!(backend.check_health().await);
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn registry_builds_memory_backend() {
  let registry = BackendRegistry::with_defaults();
  assert_eq!(registry.names(), vec!["memory", "redis", "sqlite"]);

  let backend = registry
    .build("memory", BackendConfig::Memory(MemoryConfig::default()))
    .await
    .unwrap();
  assert!(backend.set("key", CacheValue::from(1), None, false).await.unwrap());
  assert_eq!(backend.get("key").await.unwrap(), Some(CacheValue::from(1)));
  backend.close().await.unwrap();
}

#[tokio::test]
async fn registry_rejects_unknown_name() {
  let registry = BackendRegistry::with_defaults();
  let err = registry
    .build("memcached", BackendConfig::Memory(MemoryConfig::default()))
    .await
    .unwrap_err();
  assert!(matches!(err, CacheError::Backend(_)));
}

#[tokio::test]
async fn registry_rejects_mismatched_config() {
  let registry = BackendRegistry::with_defaults();
  let err = registry
    .build(
      "sqlite",
      BackendConfig::Memory(MemoryConfig::default()),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, CacheError::Backend(_)));
}

// =============================================================================
// Blocking surface
// =============================================================================

#[test]
fn blocking_cache_round_trip() {
  let registry = BackendRegistry::with_defaults();
  let cache =
    BlockingCache::open(&registry, "memory", BackendConfig::Memory(MemoryConfig::default()))
      .unwrap();

  assert!(cache.set("key", CacheValue::from("value"), None, false).unwrap());
  assert_eq!(cache.get("key").unwrap(), Some(CacheValue::from("value")));
  assert!(cache.exists("key").unwrap());
  assert_eq!(cache.ttl("key").unwrap(), TtlState::Persistent);
  assert!(cache.check_health());

  let page = cache.keys("*", 0, 10, None).unwrap();
  assert!(page.keys.contains(&"key".to_string()));

  cache.close().unwrap();
}

#[test]
fn blocking_lock_round_trip() {
  let registry = BackendRegistry::with_defaults();
  let cache =
    BlockingCache::open(&registry, "memory", BackendConfig::Memory(MemoryConfig::default()))
      .unwrap();

  let first = cache.lock("resource", Duration::from_secs(10));
  let second = cache.lock("resource", Duration::from_secs(10));

  assert!(first.try_acquire().unwrap());
  assert!(!second.try_acquire().unwrap());
  first.release().unwrap();
  assert!(second.try_acquire().unwrap());
  second.release().unwrap();
}
