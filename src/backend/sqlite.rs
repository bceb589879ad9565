//! Persistent SQLite cache engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_rusqlite::Connection;

use super::{epoch_now, glob_to_regex, paginate, spawn_sweeper, CacheBackend, Sweeper};
use crate::codec::Codec;
use crate::config::SqliteConfig;
use crate::error::{CacheError, Result};
use crate::value::{CacheValue, KeysPage, TtlState};

// WAL keeps readers unblocked while a writer commits
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at REAL,
    last_access REAL NOT NULL,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at
    ON cache_entries(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_cache_entries_last_access
    ON cache_entries(last_access);
"#;

const UPSERT: &str = r#"
INSERT INTO cache_entries (key, value, expires_at, last_access, created_at)
VALUES (?1, ?2, ?3, ?4, ?4)
ON CONFLICT(key) DO UPDATE SET
    value = excluded.value,
    expires_at = excluded.expires_at,
    last_access = excluded.last_access
"#;

/// Last observed database file mtime, for the hot-reload signal
struct ReloadState {
  mtime: Option<SystemTime>,
  changed_at: Option<DateTime<Utc>>,
}

/// Durable cache over a single SQLite database in WAL mode.
///
/// Rows round-trip through the injected codec. Every multi-statement
/// sequence runs in one transaction on the connection's worker thread,
/// which serializes same-process callers; cross-process writers rely on
/// SQLite's own locking.
pub struct SqliteBackend {
  conn: Connection,
  db_path: PathBuf,
  max_size: usize,
  hot_reload: bool,
  codec: Arc<dyn Codec>,
  reload: Mutex<ReloadState>,
  sweeper: Mutex<Option<Sweeper>>,
  closed: AtomicBool,
}

impl std::fmt::Debug for SqliteBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteBackend")
      .field("db_path", &self.db_path)
      .field("max_size", &self.max_size)
      .field("hot_reload", &self.hot_reload)
      .finish_non_exhaustive()
  }
}

impl SqliteBackend {
  /// Open (or create) the store and start its expiry sweeper.
  ///
  /// Must be called from within a Tokio runtime.
  pub async fn open(config: SqliteConfig, codec: Arc<dyn Codec>) -> Result<Arc<Self>> {
    let in_memory = config.db_path == ":memory:";
    let conn = if in_memory {
      Connection::open_in_memory().await
    } else {
      let path = Path::new(&config.db_path);
      if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
          std::fs::create_dir_all(parent).map_err(|e| CacheError::Backend(e.to_string()))?;
        }
      }
      Connection::open(&config.db_path).await
    }
    .map_err(|e| CacheError::Backend(e.to_string()))?;

    conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))?;
    tracing::info!("cache store ready at {}", config.db_path);

    let mtime = if in_memory {
      None
    } else {
      file_mtime(&config.db_path)
    };
    let backend = Arc::new(Self {
      conn,
      db_path: PathBuf::from(&config.db_path),
      max_size: config.max_size,
      hot_reload: config.hot_reload && !in_memory,
      codec,
      reload: Mutex::new(ReloadState {
        mtime,
        changed_at: None,
      }),
      sweeper: Mutex::new(None),
      closed: AtomicBool::new(false),
    });
    let every = Duration::from_secs(config.cleanup_interval_secs.max(1));
    let sweeper = spawn_sweeper(Arc::downgrade(&backend), every, |backend| async move {
      match backend.purge_expired().await {
        Ok(removed) => removed,
        Err(e) => {
          tracing::warn!("expiry sweep failed: {}", e);
          0
        }
      }
    });
    *backend.sweeper.lock() = Some(sweeper);
    Ok(backend)
  }

  /// Delete every expired row, returning how many were removed
  pub async fn purge_expired(&self) -> Result<usize> {
    self
      .conn
      .call(|conn| {
        let removed = conn.execute(
          "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at < ?1",
          params![epoch_now()],
        )?;
        Ok(removed)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  /// Number of rows currently stored, expired remnants included
  pub async fn len(&self) -> Result<usize> {
    self
      .conn
      .call(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  /// First-write timestamp of a key's row, for diagnostics
  pub async fn created_at(&self, key: &str) -> Result<Option<f64>> {
    let key = key.to_string();
    self
      .conn
      .call(move |conn| {
        let created: Option<f64> = conn
          .query_row(
            "SELECT created_at FROM cache_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
          )
          .optional()?;
        Ok(created)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  /// Timestamp of the last externally observed database change, when
  /// hot-reload detection is enabled
  pub fn last_external_change(&self) -> Option<DateTime<Utc>> {
    self.reload.lock().changed_at
  }

  /// Record when the database file changed on disk since the last look.
  /// Informational only: SQLite itself remains the source of truth.
  fn note_external_change(&self) {
    if !self.hot_reload {
      return;
    }
    let Some(mtime) = file_mtime(&self.db_path) else {
      return;
    };
    let mut reload = self.reload.lock();
    let advanced = reload.mtime.map_or(true, |seen| mtime > seen);
    if advanced {
      reload.mtime = Some(mtime);
      reload.changed_at = Some(Utc::now());
      tracing::debug!("cache database {} changed on disk", self.db_path.display());
    }
  }
}

fn file_mtime(path: impl AsRef<Path>) -> Option<SystemTime> {
  std::fs::metadata(path).ok().and_then(|meta| meta.modified().ok())
}

#[async_trait]
impl CacheBackend for SqliteBackend {
  async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
    self.note_external_change();
    let key = key.to_string();
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        let row: Option<(Vec<u8>, Option<f64>)> = {
          let mut stmt =
            tx.prepare_cached("SELECT value, expires_at FROM cache_entries WHERE key = ?1")?;
          stmt
            .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?
        };
        let Some((bytes, expires_at)) = row else {
          tx.commit()?;
          return Ok(None);
        };
        if expires_at.is_some_and(|at| now > at) {
          // lazy deletion: an expired row dies on its next read
          tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
          tx.commit()?;
          return Ok(None);
        }
        tx.execute(
          "UPDATE cache_entries SET last_access = ?1 WHERE key = ?2",
          params![now, key],
        )?;
        tx.commit()?;
        Ok(Some(bytes))
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))?;
    match raw {
      Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
      None => Ok(None),
    }
  }

  async fn set(
    &self,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
    nx: bool,
  ) -> Result<bool> {
    // a codec failure surfaces before anything touches the store
    let payload = self.codec.encode(&value)?;
    let key = key.to_string();
    let ttl_secs = ttl.map(|ttl| ttl.as_secs_f64());
    let max_size = self.max_size;
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        if nx {
          // best-effort across processes: the pre-check and the upsert
          // share a transaction, but cross-process isolation is SQLite's
          let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE key = ?1 \
             AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now],
            |row| row.get(0),
          )?;
          if live > 0 {
            return Ok(false);
          }
        }
        let existed: i64 = tx.query_row(
          "SELECT COUNT(*) FROM cache_entries WHERE key = ?1",
          params![key],
          |row| row.get(0),
        )?;
        let expires_at = ttl_secs.map(|secs| now + secs);
        tx.execute(UPSERT, params![key, payload, expires_at, now])?;
        if existed == 0 {
          // only a brand-new key can push the table over capacity
          let total: i64 =
            tx.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
          let over = total - max_size as i64;
          if over > 0 {
            tx.execute(
              "DELETE FROM cache_entries WHERE key IN (
                 SELECT key FROM cache_entries ORDER BY last_access ASC LIMIT ?1
               )",
              params![over],
            )?;
          }
        }
        tx.commit()?;
        Ok(true)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    let key = key.to_string();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        let live = tx.execute(
          "DELETE FROM cache_entries WHERE key = ?1 \
           AND (expires_at IS NULL OR expires_at > ?2)",
          params![key, now],
        )?;
        if live == 0 {
          // drop an expired remnant without reporting a removal
          tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(live > 0)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    let key = key.to_string();
    self
      .conn
      .call(move |conn| {
        let live: i64 = conn.query_row(
          "SELECT COUNT(*) FROM cache_entries WHERE key = ?1 \
           AND (expires_at IS NULL OR expires_at > ?2)",
          params![key, epoch_now()],
          |row| row.get(0),
        )?;
        Ok(live > 0)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn clear(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
    if keys.is_empty() {
      return Ok(HashMap::new());
    }
    self.note_external_change();
    let keys = keys.to_vec();
    let rows = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        let mut rows = Vec::new();
        for key in &keys {
          let row: Option<(Vec<u8>, Option<f64>)> = {
            let mut stmt =
              tx.prepare_cached("SELECT value, expires_at FROM cache_entries WHERE key = ?1")?;
            stmt
              .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
              .optional()?
          };
          let Some((bytes, expires_at)) = row else {
            continue;
          };
          if expires_at.is_some_and(|at| now > at) {
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            continue;
          }
          tx.execute(
            "UPDATE cache_entries SET last_access = ?1 WHERE key = ?2",
            params![now, key],
          )?;
          rows.push((key.clone(), bytes));
        }
        tx.commit()?;
        Ok(rows)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))?;

    let mut found = HashMap::new();
    for (key, bytes) in rows {
      found.insert(key, self.codec.decode(&bytes)?);
    }
    Ok(found)
  }

  async fn set_many(
    &self,
    mapping: &HashMap<String, CacheValue>,
    ttl: Option<Duration>,
  ) -> Result<()> {
    if mapping.is_empty() {
      return Ok(());
    }
    let mut encoded = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
      encoded.push((key.clone(), self.codec.encode(value)?));
    }
    let ttl_secs = ttl.map(|ttl| ttl.as_secs_f64());
    let max_size = self.max_size;
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        let expires_at = ttl_secs.map(|secs| now + secs);
        for (key, payload) in &encoded {
          tx.execute(UPSERT, params![key, payload, expires_at, now])?;
        }
        let total: i64 =
          tx.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let over = total - max_size as i64;
        if over > 0 {
          tx.execute(
            "DELETE FROM cache_entries WHERE key IN (
               SELECT key FROM cache_entries ORDER BY last_access ASC LIMIT ?1
             )",
            params![over],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn delete_many(&self, keys: &[String]) -> Result<usize> {
    if keys.is_empty() {
      return Ok(0);
    }
    let keys = keys.to_vec();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = epoch_now();
        let mut removed = 0;
        for key in &keys {
          let live = tx.execute(
            "DELETE FROM cache_entries WHERE key = ?1 \
             AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now],
          )?;
          if live > 0 {
            removed += 1;
          } else {
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
          }
        }
        tx.commit()?;
        Ok(removed)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn keys(
    &self,
    pattern: &str,
    cursor: u64,
    count: usize,
    max_keys: Option<usize>,
  ) -> Result<KeysPage> {
    let regex = glob_to_regex(pattern);
    let all = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT key FROM cache_entries \
           WHERE expires_at IS NULL OR expires_at > ?1 ORDER BY key",
        )?;
        let keys = stmt
          .query_map(params![epoch_now()], |row| row.get::<_, String>(0))?
          .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))?;
    let matched: Vec<String> = all.into_iter().filter(|key| regex.is_match(key)).collect();
    Ok(paginate(matched, cursor, count, max_keys))
  }

  async fn ttl(&self, key: &str) -> Result<TtlState> {
    let key = key.to_string();
    self
      .conn
      .call(move |conn| {
        let row: Option<Option<f64>> = conn
          .query_row(
            "SELECT expires_at FROM cache_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
          )
          .optional()?;
        let state = match row {
          None => TtlState::Missing,
          Some(None) => TtlState::Persistent,
          Some(Some(at)) => {
            let now = epoch_now();
            if now >= at {
              TtlState::Missing
            } else {
              TtlState::Expires(Duration::from_secs_f64(at - now))
            }
          }
        };
        Ok(state)
      })
      .await
      .map_err(|e| CacheError::Backend(e.to_string()))
  }

  async fn close(&self) -> Result<()> {
    let sweeper = self.sweeper.lock().take();
    if let Some(sweeper) = sweeper {
      sweeper.stop().await;
    }
    if !self.closed.swap(true, Ordering::SeqCst) {
      self
        .conn
        .clone()
        .close()
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;
    }
    Ok(())
  }
}
