//! Explicit backend registry
//!
//! A name-to-factory table built once at startup and passed by
//! reference to whatever creates backends by name. There is no
//! process-global registry; callers own the value.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{CacheBackend, MemoryBackend, RedisBackend, SqliteBackend};
use crate::config::BackendConfig;
use crate::error::{CacheError, Result};

/// Boxed async constructor for a backend
pub type BackendFactory =
  Box<dyn Fn(BackendConfig) -> BoxFuture<'static, Result<Arc<dyn CacheBackend>>> + Send + Sync>;

pub struct BackendRegistry {
  factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
  /// Empty registry
  pub fn new() -> Self {
    Self {
      factories: HashMap::new(),
    }
  }

  /// Registry with the built-in memory, sqlite and redis backends
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(
      "memory",
      Box::new(|config| {
        Box::pin(async move {
          match config {
            BackendConfig::Memory(config) => {
              let backend: Arc<dyn CacheBackend> = MemoryBackend::new(config);
              Ok(backend)
            }
            other => Err(config_mismatch("memory", &other)),
          }
        })
      }),
    );
    registry.register(
      "sqlite",
      Box::new(|config| {
        Box::pin(async move {
          match config {
            BackendConfig::Sqlite(config) => {
              let codec = config.codec.build();
              let backend: Arc<dyn CacheBackend> = SqliteBackend::open(config, codec).await?;
              Ok(backend)
            }
            other => Err(config_mismatch("sqlite", &other)),
          }
        })
      }),
    );
    registry.register(
      "redis",
      Box::new(|config| {
        Box::pin(async move {
          match config {
            BackendConfig::Redis(config) => {
              let codec = config.codec.build();
              let backend: Arc<dyn CacheBackend> =
                Arc::new(RedisBackend::connect(config, codec).await?);
              Ok(backend)
            }
            other => Err(config_mismatch("redis", &other)),
          }
        })
      }),
    );
    registry
  }

  /// Register a factory under a case-insensitive name, replacing any
  /// previous registration for that name
  pub fn register(&mut self, name: &str, factory: BackendFactory) {
    self.factories.insert(name.trim().to_lowercase(), factory);
  }

  /// Build a backend by registered name
  pub async fn build(&self, name: &str, config: BackendConfig) -> Result<Arc<dyn CacheBackend>> {
    let key = name.trim().to_lowercase();
    let factory = self
      .factories
      .get(&key)
      .ok_or_else(|| CacheError::Backend(format!("unknown cache backend '{}'", name)))?;
    factory(config).await
  }

  /// Registered backend names, sorted
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.factories.keys().cloned().collect();
    names.sort();
    names
  }
}

impl Default for BackendRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

fn config_mismatch(expected: &str, got: &BackendConfig) -> CacheError {
  CacheError::Backend(format!(
    "backend '{}' cannot be built from a {} configuration",
    expected,
    got.kind()
  ))
}
