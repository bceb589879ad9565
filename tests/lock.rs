//! Distributed lock tests

use acorn_cache::{
  CacheBackend, CacheValue, DistributedLock, MemoryBackend, MemoryConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn backend() -> Arc<dyn CacheBackend> {
  MemoryBackend::new(MemoryConfig::default())
}

// =============================================================================
// Mutual exclusion
// =============================================================================

#[tokio::test]
async fn mutual_exclusion() {
  let backend = backend();
  let first = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));
  let second = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  assert!(first.try_acquire().await.unwrap());
  assert!(first.is_held());
  assert!(!second.try_acquire().await.unwrap());

  first.release().await.unwrap();
  assert!(!first.is_held());
  assert!(second.try_acquire().await.unwrap());
  second.release().await.unwrap();
}

#[tokio::test]
async fn locks_on_different_names_are_independent() {
  let backend = backend();
  let first = DistributedLock::new(backend.clone(), "alpha", Duration::from_secs(30));
  let second = DistributedLock::new(backend.clone(), "beta", Duration::from_secs(30));

  assert!(first.try_acquire().await.unwrap());
  assert!(second.try_acquire().await.unwrap());
}

#[tokio::test]
async fn lock_entry_uses_lock_prefix() {
  let backend = backend();
  let lock = DistributedLock::new(backend.clone(), "job:42", Duration::from_secs(30));
  assert_eq!(lock.key(), "lock:job:42");

  lock.try_acquire().await.unwrap();
  let stored = backend.get("lock:job:42").await.unwrap();
  assert!(matches!(stored, Some(CacheValue::String(_))));
}

// =============================================================================
// Release ownership
// =============================================================================

#[tokio::test]
async fn release_without_acquire_is_a_safe_noop() {
  let backend = backend();
  let holder = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));
  let bystander = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  assert!(holder.try_acquire().await.unwrap());
  bystander.release().await.unwrap();

  // the holder's entry survived the bystander's release
  assert!(!bystander.try_acquire().await.unwrap());
  holder.release().await.unwrap();
}

#[tokio::test]
async fn release_only_removes_own_token() {
  let backend = backend();
  let first = DistributedLock::new(backend.clone(), "resource", Duration::from_millis(80));
  let second = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  assert!(first.try_acquire().await.unwrap());
  // first's entry expires and second takes over
  tokio::time::sleep(Duration::from_millis(120)).await;
  assert!(second.try_acquire().await.unwrap());

  // first still believes it holds the lock, but its token is gone
  first.release().await.unwrap();
  assert!(backend.get("lock:resource").await.unwrap().is_some());
  second.release().await.unwrap();
}

// =============================================================================
// Waiting modes
// =============================================================================

#[tokio::test]
async fn acquire_timeout_gives_up() {
  let backend = backend();
  let holder = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));
  let waiter = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  holder.acquire().await.unwrap();

  let started = Instant::now();
  let taken = waiter.acquire_timeout(Duration::from_millis(60)).await.unwrap();
  assert!(!taken);
  assert!(started.elapsed() >= Duration::from_millis(60));
  holder.release().await.unwrap();
}

#[tokio::test]
async fn acquire_waits_for_release() {
  let backend = backend();
  let holder = Arc::new(DistributedLock::new(
    backend.clone(),
    "resource",
    Duration::from_secs(30),
  ));
  let waiter = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  holder.acquire().await.unwrap();

  let releasing = holder.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    releasing.release().await.unwrap();
  });

  waiter.acquire().await.unwrap();
  assert!(waiter.is_held());
  waiter.release().await.unwrap();
}

#[tokio::test]
async fn expired_lock_can_be_reacquired() {
  let backend = backend();
  let first = DistributedLock::new(backend.clone(), "resource", Duration::from_millis(80));
  let second = DistributedLock::new(backend.clone(), "resource", Duration::from_secs(30));

  assert!(first.try_acquire().await.unwrap());
  tokio::time::sleep(Duration::from_millis(120)).await;

  // the safety ttl reclaimed the crashed holder's entry
  assert!(second.try_acquire().await.unwrap());
}
