//! Distributed lock built on the backend contract

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::value::CacheValue;

/// Poll interval while waiting for a held lock
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TTL-guarded mutual exclusion over any cache backend.
///
/// The lock is an ordinary cache entry under `lock:{name}` whose value
/// is a call-unique owner token; its ttl bounds how long a crashed
/// holder can block everyone else. Works against every engine because
/// it only composes contract operations.
pub struct DistributedLock {
  backend: Arc<dyn CacheBackend>,
  key: String,
  timeout: Duration,
  token: String,
  held: AtomicBool,
}

impl DistributedLock {
  /// `timeout` is the safety ttl placed on the lock entry
  pub fn new(backend: Arc<dyn CacheBackend>, name: &str, timeout: Duration) -> Self {
    Self {
      backend,
      key: format!("lock:{}", name),
      timeout,
      token: Uuid::new_v4().to_string(),
      held: AtomicBool::new(false),
    }
  }

  /// Try once, without waiting; true when the lock was taken
  pub async fn try_acquire(&self) -> Result<bool> {
    let token = CacheValue::String(self.token.clone());
    let taken = self
      .backend
      .set(&self.key, token, Some(self.timeout), true)
      .await?;
    if taken {
      self.held.store(true, Ordering::SeqCst);
    }
    Ok(taken)
  }

  /// Poll until the lock is taken
  pub async fn acquire(&self) -> Result<()> {
    loop {
      if self.try_acquire().await? {
        return Ok(());
      }
      tokio::time::sleep(POLL_INTERVAL).await;
    }
  }

  /// Poll until the lock is taken or the deadline passes
  pub async fn acquire_timeout(&self, wait: Duration) -> Result<bool> {
    let deadline = Instant::now() + wait;
    loop {
      if self.try_acquire().await? {
        return Ok(true);
      }
      if Instant::now() >= deadline {
        return Ok(false);
      }
      tokio::time::sleep(POLL_INTERVAL).await;
    }
  }

  /// Release the lock when this instance holds it; a no-op otherwise.
  ///
  /// The owner read and the delete are two operations: a holder whose
  /// entry expired between them can race a new owner. Closing that
  /// window needs an atomic compare-and-delete none of the engines
  /// offers.
  pub async fn release(&self) -> Result<()> {
    if !self.held.load(Ordering::SeqCst) {
      return Ok(());
    }
    let owner = self.backend.get(&self.key).await?;
    if owner.as_ref().and_then(|value| value.as_str()) == Some(self.token.as_str()) {
      self.backend.delete(&self.key).await?;
    }
    self.held.store(false, Ordering::SeqCst);
    Ok(())
  }

  /// Whether this instance believes it holds the lock
  pub fn is_held(&self) -> bool {
    self.held.load(Ordering::SeqCst)
  }

  /// Backend key the lock lives under
  pub fn key(&self) -> &str {
    &self.key
  }
}
