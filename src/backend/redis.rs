//! Remote Redis cache engine

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::CacheBackend;
use crate::codec::Codec;
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};
use crate::value::{CacheValue, KeysPage, TtlState};

/// Thin adapter over a Redis server.
///
/// Expiry, eviction and cross-client consistency are all delegated to
/// the server; this side only namespaces keys, round-trips values
/// through the codec and maps batch operations onto the native
/// multi-key primitives. There is no local lock: concurrent callers are
/// safe because every operation is a single server command or pipeline.
pub struct RedisBackend {
  connection: ConnectionManager,
  key_prefix: String,
  codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for RedisBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RedisBackend")
      .field("key_prefix", &self.key_prefix)
      .finish_non_exhaustive()
  }
}

impl RedisBackend {
  /// Connect and verify the server with a PING
  pub async fn connect(config: RedisConfig, codec: Arc<dyn Codec>) -> Result<Self> {
    let url = config.connection_url();
    let client = Client::open(url.as_str()).map_err(connection_err)?;
    let connection = ConnectionManager::new(client)
      .await
      .map_err(connection_err)?;
    let mut probe = connection.clone();
    redis::cmd("PING")
      .query_async::<()>(&mut probe)
      .await
      .map_err(connection_err)?;
    tracing::info!("connected to redis at {}:{}", config.host, config.port);
    Ok(Self {
      connection,
      key_prefix: config.key_prefix,
      codec,
    })
  }

  fn full_key(&self, key: &str) -> String {
    format!("{}{}", self.key_prefix, key)
  }
}

/// Map a redis error onto the contract taxonomy
fn backend_err(e: RedisError) -> CacheError {
  let unreachable = e.is_io_error()
    || e.is_connection_refusal()
    || e.is_connection_dropped()
    || e.is_timeout()
    || e.kind() == redis::ErrorKind::AuthenticationFailed;
  if unreachable {
    CacheError::Connection(e.to_string())
  } else {
    CacheError::Backend(e.to_string())
  }
}

fn connection_err(e: RedisError) -> CacheError {
  CacheError::Connection(e.to_string())
}

/// Map a TTL reply onto the contract's three-valued state
fn ttl_from_secs(secs: i64) -> TtlState {
  match secs {
    -1 => TtlState::Persistent,
    secs if secs < 0 => TtlState::Missing,
    secs => TtlState::Expires(Duration::from_secs(secs as u64)),
  }
}

#[async_trait]
impl CacheBackend for RedisBackend {
  async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
    let mut conn = self.connection.clone();
    let raw: Option<Vec<u8>> = conn.get(self.full_key(key)).await.map_err(backend_err)?;
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
    let payload = self.codec.encode(&value)?;
    let mut conn = self.connection.clone();
    let mut cmd = redis::cmd("SET");
    cmd.arg(self.full_key(key)).arg(payload);
    // the server rejects non-positive expire times, so a zero ttl is
    // sent as "no expiry"; whether such a key ever dies is up to the
    // server's own eviction policy
    match ttl {
      Some(ttl) if ttl.as_secs() > 0 => {
        cmd.arg("EX").arg(ttl.as_secs());
      }
      Some(ttl) if !ttl.is_zero() => {
        cmd.arg("PX").arg(ttl.as_millis() as u64);
      }
      _ => {}
    }
    if nx {
      cmd.arg("NX");
    }
    // SET NX answers nil instead of OK when the key already exists
    let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(backend_err)?;
    Ok(reply.is_some())
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    let mut conn = self.connection.clone();
    let removed: i64 = conn.del(self.full_key(key)).await.map_err(backend_err)?;
    Ok(removed > 0)
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    let mut conn = self.connection.clone();
    let found: bool = conn.exists(self.full_key(key)).await.map_err(backend_err)?;
    Ok(found)
  }

  async fn clear(&self) -> Result<()> {
    // walk only this namespace with SCAN; FLUSHDB would take the
    // whole database with it
    let mut conn = self.connection.clone();
    let pattern = format!("{}*", self.key_prefix);
    let mut cursor: u64 = 0;
    loop {
      let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("MATCH")
        .arg(&pattern)
        .arg("COUNT")
        .arg(100)
        .query_async(&mut conn)
        .await
        .map_err(backend_err)?;
      if !keys.is_empty() {
        let _: i64 = conn.del(keys).await.map_err(backend_err)?;
      }
      if next == 0 {
        break;
      }
      cursor = next;
    }
    Ok(())
  }

  async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
    if keys.is_empty() {
      return Ok(HashMap::new());
    }
    let mut conn = self.connection.clone();
    let full: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();
    let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
      .arg(&full)
      .query_async(&mut conn)
      .await
      .map_err(backend_err)?;
    let mut found = HashMap::new();
    for (key, raw) in keys.iter().zip(values) {
      if let Some(bytes) = raw {
        found.insert(key.clone(), self.codec.decode(&bytes)?);
      }
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
    let secs = ttl.map(|ttl| ttl.as_secs()).filter(|secs| *secs > 0);
    let mut pipe = redis::pipe();
    for (key, value) in mapping {
      let payload = self.codec.encode(value)?;
      let full = self.full_key(key);
      match secs {
        Some(secs) => {
          pipe.set_ex(full, payload, secs).ignore();
        }
        None => {
          pipe.set(full, payload).ignore();
        }
      }
    }
    let mut conn = self.connection.clone();
    let _: () = pipe.query_async(&mut conn).await.map_err(backend_err)?;
    Ok(())
  }

  async fn delete_many(&self, keys: &[String]) -> Result<usize> {
    if keys.is_empty() {
      return Ok(0);
    }
    let mut conn = self.connection.clone();
    let full: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();
    let removed: i64 = conn.del(full).await.map_err(backend_err)?;
    Ok(removed as usize)
  }

  async fn keys(
    &self,
    pattern: &str,
    cursor: u64,
    count: usize,
    max_keys: Option<usize>,
  ) -> Result<KeysPage> {
    let mut conn = self.connection.clone();
    let full_pattern = format!("{}{}", self.key_prefix, pattern);
    let (next, found): (u64, Vec<String>) = redis::cmd("SCAN")
      .arg(cursor)
      .arg("MATCH")
      .arg(full_pattern)
      .arg("COUNT")
      .arg(count.max(1))
      .query_async(&mut conn)
      .await
      .map_err(backend_err)?;
    // SCAN may overshoot its COUNT hint; cap the page regardless
    let mut keys: Vec<String> = found
      .iter()
      .map(|key| key.strip_prefix(&self.key_prefix).unwrap_or(key).to_string())
      .collect();
    keys.truncate(count.max(1));
    if let Some(max) = max_keys {
      keys.truncate(max);
    }
    Ok(KeysPage {
      total_scanned: keys.len(),
      cursor: next,
      has_more: next != 0,
      keys,
    })
  }

  async fn ttl(&self, key: &str) -> Result<TtlState> {
    let mut conn = self.connection.clone();
    let secs: i64 = conn.ttl(self.full_key(key)).await.map_err(backend_err)?;
    Ok(ttl_from_secs(secs))
  }

  async fn close(&self) -> Result<()> {
    // the multiplexed connection closes when its last clone drops
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ttl_reply_mapping() {
    assert_eq!(ttl_from_secs(-2), TtlState::Missing);
    assert_eq!(ttl_from_secs(-1), TtlState::Persistent);
    assert_eq!(ttl_from_secs(90), TtlState::Expires(Duration::from_secs(90)));
  }
}
