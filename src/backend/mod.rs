//! Backend contract and shared engine helpers

mod memory;
mod redis;
mod sqlite;

pub use memory::{MemoryBackend, MemoryStats};
pub use redis::RedisBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::value::{CacheValue, KeysPage, TtlState};

/// Key written and read by the health probe
const HEALTH_CHECK_KEY: &str = "__health_check__";

/// Uniform contract implemented by every cache engine.
///
/// An entry whose expiry has passed is logically absent everywhere:
/// `get`, `exists` and the batch reads never return it, even while it is
/// still physically stored. All operations propagate codec and storage
/// failures; only `check_health` converts them to a boolean.
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
  /// Fetch a live value, refreshing its LRU position
  async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

  /// Store a value. `ttl` of `None` never expires. With `nx` the write
  /// only happens when no live entry exists, as a single logical step
  /// per key, and `false` is returned otherwise.
  async fn set(
    &self,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
    nx: bool,
  ) -> Result<bool>;

  /// Remove a key, reporting whether a live entry was removed
  async fn delete(&self, key: &str) -> Result<bool>;

  /// Whether a live entry exists, without touching its LRU position
  async fn exists(&self, key: &str) -> Result<bool>;

  /// Remove every entry. Irreversible.
  async fn clear(&self) -> Result<()>;

  /// Fetch several keys; absent or expired keys are omitted from the
  /// result rather than reported as errors
  async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
    let mut found = HashMap::new();
    for key in keys {
      if let Some(value) = self.get(key).await? {
        found.insert(key.clone(), value);
      }
    }
    Ok(found)
  }

  /// Store several values under one shared ttl
  async fn set_many(
    &self,
    mapping: &HashMap<String, CacheValue>,
    ttl: Option<Duration>,
  ) -> Result<()> {
    for (key, value) in mapping {
      self.set(key, value.clone(), ttl, false).await?;
    }
    Ok(())
  }

  /// Delete several keys, returning how many live entries were removed
  async fn delete_many(&self, keys: &[String]) -> Result<usize> {
    let mut removed = 0;
    for key in keys {
      if self.delete(key).await? {
        removed += 1;
      }
    }
    Ok(removed)
  }

  /// Scan live keys matching a glob pattern (`*` any run, `?` one
  /// character), one page at a time. A cursor loop over an unmodified
  /// store visits every matching key exactly once; under concurrent
  /// mutation the scan is best-effort.
  async fn keys(
    &self,
    pattern: &str,
    cursor: u64,
    count: usize,
    max_keys: Option<usize>,
  ) -> Result<KeysPage>;

  /// Remaining lifetime of a key
  async fn ttl(&self, key: &str) -> Result<TtlState>;

  /// Stop background tasks and release resources. Idempotent.
  async fn close(&self) -> Result<()>;

  /// Round-trip probe: write, read back and delete a sentinel key.
  /// Every failure becomes `false`.
  async fn check_health(&self) -> bool {
    let value = CacheValue::String("ok".to_string());
    if self
      .set(HEALTH_CHECK_KEY, value.clone(), Some(Duration::from_secs(1)), false)
      .await
      .is_err()
    {
      return false;
    }
    let read = match self.get(HEALTH_CHECK_KEY).await {
      Ok(read) => read,
      Err(_) => return false,
    };
    let _ = self.delete(HEALTH_CHECK_KEY).await;
    read == Some(value)
  }
}

/// Seconds since the Unix epoch as a float, matching the REAL columns
pub(crate) fn epoch_now() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or_default()
}

/// Convert a glob pattern to an anchored regex
pub(crate) fn glob_to_regex(pattern: &str) -> regex::Regex {
  let mut regex_str = String::with_capacity(pattern.len() * 2);
  regex_str.push('^');

  for c in pattern.chars() {
    match c {
      '*' => regex_str.push_str(".*"),
      '?' => regex_str.push('.'),
      '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\' => {
        regex_str.push('\\');
        regex_str.push(c);
      }
      _ => regex_str.push(c),
    }
  }

  regex_str.push('$');
  regex::Regex::new(&regex_str).unwrap_or_else(|_| regex::Regex::new("^$").unwrap())
}

/// Slice a matched key list into one cursor page
pub(crate) fn paginate(
  matched: Vec<String>,
  cursor: u64,
  count: usize,
  max_keys: Option<usize>,
) -> KeysPage {
  let total = matched.len();
  let start = (cursor as usize).min(total);
  let mut end = start.saturating_add(count.max(1)).min(total);
  if let Some(max) = max_keys {
    end = end.min(start.saturating_add(max));
  }
  let keys: Vec<String> = matched[start..end].to_vec();
  let next = if end < total && end > start { end as u64 } else { 0 };
  KeysPage {
    total_scanned: keys.len(),
    cursor: next,
    has_more: next > 0,
    keys,
  }
}

/// Handle to a running background expiry sweeper
pub(crate) struct Sweeper {
  shutdown: oneshot::Sender<()>,
  handle: JoinHandle<()>,
}

impl Sweeper {
  /// Signal the task and wait for it to stop, bounded to one second
  pub(crate) async fn stop(self) {
    let _ = self.shutdown.send(());
    if tokio::time::timeout(Duration::from_secs(1), self.handle)
      .await
      .is_err()
    {
      tracing::warn!("expiry sweeper did not stop within 1s");
    }
  }
}

/// Spawn a periodic expiry sweep over a weakly-held engine.
///
/// The weak handle lets a dropped engine end its sweeper on the next
/// tick even when `close` was never called.
pub(crate) fn spawn_sweeper<B, F, Fut>(backend: Weak<B>, every: Duration, sweep: F) -> Sweeper
where
  B: Send + Sync + 'static,
  F: Fn(Arc<B>) -> Fut + Send + 'static,
  Fut: Future<Output = usize> + Send + 'static,
{
  let (shutdown, mut signal) = oneshot::channel();
  // interval panics on a zero period
  let every = every.max(Duration::from_millis(1));
  let handle = tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let Some(backend) = backend.upgrade() else { break };
          let removed = sweep(backend).await;
          if removed > 0 {
            tracing::debug!("expiry sweep removed {} entries", removed);
          }
        }
        _ = &mut signal => break,
      }
    }
  });
  Sweeper { shutdown, handle }
}
