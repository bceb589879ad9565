//! Backend configuration types
//!
//! Plain serde structs so a backend can be built from deserialized
//! settings; loading those settings from files or the environment is
//! the caller's concern.

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;

/// Memory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
  /// Maximum number of entries before LRU eviction; 0 refuses all writes
  #[serde(default = "default_max_size")]
  pub max_size: usize,

  /// Seconds between background expiry sweeps
  #[serde(default = "default_memory_cleanup")]
  pub cleanup_interval_secs: u64,
}

impl Default for MemoryConfig {
  fn default() -> Self {
    Self {
      max_size: default_max_size(),
      cleanup_interval_secs: default_memory_cleanup(),
    }
  }
}

/// Persistent SQLite engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
  /// Database file path; `:memory:` for a transient store
  #[serde(default = "default_db_path")]
  pub db_path: String,

  /// Maximum number of rows before LRU eviction
  #[serde(default = "default_max_size")]
  pub max_size: usize,

  /// Seconds between background expiry sweeps
  #[serde(default = "default_sqlite_cleanup")]
  pub cleanup_interval_secs: u64,

  /// Record when the database file changes on disk (diagnostic only)
  #[serde(default)]
  pub hot_reload: bool,

  /// Value codec
  #[serde(default)]
  pub codec: CodecKind,
}

impl Default for SqliteConfig {
  fn default() -> Self {
    Self {
      db_path: default_db_path(),
      max_size: default_max_size(),
      cleanup_interval_secs: default_sqlite_cleanup(),
      hot_reload: false,
      codec: CodecKind::default(),
    }
  }
}

/// Remote Redis engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
  #[serde(default = "default_host")]
  pub host: String,

  #[serde(default = "default_redis_port")]
  pub port: u16,

  /// Database index
  #[serde(default)]
  pub database: u8,

  #[serde(default)]
  pub password: Option<String>,

  #[serde(default)]
  pub tls_enabled: bool,

  /// Prefix prepended to every key sent to the server
  #[serde(default = "default_key_prefix")]
  pub key_prefix: String,

  /// Value codec
  #[serde(default)]
  pub codec: CodecKind,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_redis_port(),
      database: 0,
      password: None,
      tls_enabled: false,
      key_prefix: default_key_prefix(),
      codec: CodecKind::default(),
    }
  }
}

impl RedisConfig {
  /// Redis connection URL
  pub fn connection_url(&self) -> String {
    let scheme = if self.tls_enabled { "rediss" } else { "redis" };
    let auth = match &self.password {
      Some(password) if !password.is_empty() => format!(":{}@", password),
      _ => String::new(),
    };
    format!(
      "{}://{}{}:{}/{}",
      scheme, auth, self.host, self.port, self.database
    )
  }
}

/// Tagged configuration selecting one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
  Memory(MemoryConfig),
  Sqlite(SqliteConfig),
  Redis(RedisConfig),
}

impl BackendConfig {
  /// Name of the engine this configuration selects
  pub fn kind(&self) -> &'static str {
    match self {
      BackendConfig::Memory(_) => "memory",
      BackendConfig::Sqlite(_) => "sqlite",
      BackendConfig::Redis(_) => "redis",
    }
  }
}

fn default_max_size() -> usize {
  10_000
}

fn default_memory_cleanup() -> u64 {
  60
}

fn default_sqlite_cleanup() -> u64 {
  300
}

fn default_db_path() -> String {
  "./acorn_cache.db".to_string()
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_redis_port() -> u16 {
  6379
}

fn default_key_prefix() -> String {
  "acorn:".to_string()
}
