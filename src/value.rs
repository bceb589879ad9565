//! Cache value and scan result types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache value types (JSON-compatible)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue {
  #[default]
  Null,
  String(String),
  Integer(i64),
  Json(serde_json::Value),
}

impl CacheValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      CacheValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      CacheValue::Integer(i) => Some(*i),
      CacheValue::String(s) => s.parse().ok(),
      _ => None,
    }
  }

  /// JSON representation used at the codec boundary
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      CacheValue::Null => serde_json::Value::Null,
      CacheValue::String(s) => serde_json::Value::String(s.clone()),
      CacheValue::Integer(i) => serde_json::Value::Number((*i).into()),
      CacheValue::Json(v) => v.clone(),
    }
  }
}

impl From<String> for CacheValue {
  fn from(s: String) -> Self {
    CacheValue::String(s)
  }
}

impl From<&str> for CacheValue {
  fn from(s: &str) -> Self {
    CacheValue::String(s.to_string())
  }
}

impl From<i64> for CacheValue {
  fn from(i: i64) -> Self {
    CacheValue::Integer(i)
  }
}

impl From<serde_json::Value> for CacheValue {
  fn from(v: serde_json::Value) -> Self {
    match v {
      serde_json::Value::Null => CacheValue::Null,
      serde_json::Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          CacheValue::Integer(i)
        } else {
          CacheValue::Json(serde_json::Value::Number(n))
        }
      }
      serde_json::Value::String(s) => CacheValue::String(s),
      other => CacheValue::Json(other),
    }
  }
}

/// One page of a key scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysPage {
  pub keys: Vec<String>,
  /// Resumption cursor; 0 when the scan is exhausted
  pub cursor: u64,
  pub has_more: bool,
  pub total_scanned: usize,
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
  /// No live entry for the key
  Missing,
  /// Live entry that never expires
  Persistent,
  /// Live entry expiring after the contained duration
  Expires(Duration),
}

impl TtlState {
  /// Redis-style sentinel seconds: -2 missing, -1 persistent
  pub fn as_secs(&self) -> i64 {
    match self {
      TtlState::Missing => -2,
      TtlState::Persistent => -1,
      TtlState::Expires(d) => d.as_secs() as i64,
    }
  }

  pub fn is_missing(&self) -> bool {
    matches!(self, TtlState::Missing)
  }
}
