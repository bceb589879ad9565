//! Pluggable value codecs
//!
//! Backends that serialize (SQLite, Redis) take a codec at construction
//! and round-trip every value through it. Failures surface as
//! `CacheError::Serialization` and are never swallowed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::value::CacheValue;

/// Turns cache values into bytes and back
pub trait Codec: Send + Sync {
  fn encode(&self, value: &CacheValue) -> Result<Vec<u8>>;
  fn decode(&self, bytes: &[u8]) -> Result<CacheValue>;
}

/// Human-readable JSON codec
pub struct JsonCodec;

impl Codec for JsonCodec {
  fn encode(&self, value: &CacheValue) -> Result<Vec<u8>> {
    serde_json::to_vec(&value.to_json()).map_err(|e| CacheError::Serialization(e.to_string()))
  }

  fn decode(&self, bytes: &[u8]) -> Result<CacheValue> {
    let json: serde_json::Value =
      serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;
    Ok(CacheValue::from(json))
  }
}

/// Compact MessagePack codec (the default)
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
  fn encode(&self, value: &CacheValue) -> Result<Vec<u8>> {
    rmp_serde::to_vec(&value.to_json()).map_err(|e| CacheError::Serialization(e.to_string()))
  }

  fn decode(&self, bytes: &[u8]) -> Result<CacheValue> {
    let json: serde_json::Value =
      rmp_serde::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;
    Ok(CacheValue::from(json))
  }
}

/// Codec selection for backend configs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
  Json,
  #[default]
  Msgpack,
}

impl CodecKind {
  pub fn build(self) -> Arc<dyn Codec> {
    match self {
      CodecKind::Json => Arc::new(JsonCodec),
      CodecKind::Msgpack => Arc::new(MsgPackCodec),
    }
  }
}

impl std::fmt::Display for CodecKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CodecKind::Json => write!(f, "json"),
      CodecKind::Msgpack => write!(f, "msgpack"),
    }
  }
}

impl std::str::FromStr for CodecKind {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "json" => Ok(CodecKind::Json),
      "msgpack" | "messagepack" => Ok(CodecKind::Msgpack),
      _ => Err(format!("Unknown codec: {}", s)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_values() -> Vec<CacheValue> {
    vec![
      CacheValue::Null,
      CacheValue::String("hello".to_string()),
      CacheValue::Integer(-42),
      CacheValue::Json(serde_json::json!({"name": "alice", "tags": [1, 2]})),
    ]
  }

  #[test]
  fn json_codec_round_trip() {
    let codec = JsonCodec;
    for value in sample_values() {
      let bytes = codec.encode(&value).unwrap();
      assert_eq!(codec.decode(&bytes).unwrap(), value);
    }
  }

  #[test]
  fn msgpack_codec_round_trip() {
    let codec = MsgPackCodec;
    for value in sample_values() {
      let bytes = codec.encode(&value).unwrap();
      assert_eq!(codec.decode(&bytes).unwrap(), value);
    }
  }

  #[test]
  fn decode_garbage_is_serialization_error() {
    let garbage = b"\xff\xff not a payload";
    assert!(matches!(
      JsonCodec.decode(garbage),
      Err(CacheError::Serialization(_))
    ));
    assert!(matches!(
      MsgPackCodec.decode(b""),
      Err(CacheError::Serialization(_))
    ));
  }

  #[test]
  fn codec_kind_parse() {
    assert_eq!("json".parse::<CodecKind>().unwrap(), CodecKind::Json);
    assert_eq!("msgpack".parse::<CodecKind>().unwrap(), CodecKind::Msgpack);
    assert!("pickle".parse::<CodecKind>().is_err());
  }
}
