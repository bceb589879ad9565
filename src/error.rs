//! Error taxonomy shared by every cache backend

use thiserror::Error;

/// Errors raised by backend operations.
///
/// A genuine cache miss is never reported through this type: missing or
/// expired keys come back as `Ok(None)` / `Ok(false)`, so callers can
/// always tell a miss from a failure. Every operation propagates these
/// unchanged except `check_health`, which folds them into `false`.
#[derive(Debug, Error)]
pub enum CacheError {
  /// Encoding or decoding a cached value failed
  #[error("serialization failed: {0}")]
  Serialization(String),

  /// The storage layer failed an operation
  #[error("backend operation failed: {0}")]
  Backend(String),

  /// The remote store is unreachable or refused the connection
  #[error("connection failed: {0}")]
  Connection(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
