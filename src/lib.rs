//! Pluggable cache backends with TTL expiry and LRU eviction
//!
//! Provides a uniform key/value caching contract with:
//! - An in-memory LRU store with lazy expiry and background sweeping
//! - A persistent SQLite store (WAL mode) with LRU eviction and a
//!   cooperative hot-reload signal
//! - A Redis adapter using the server's native pipelined primitives
//! - A TTL-guarded distributed lock built on the contract
//! - Pluggable JSON / MessagePack value codecs
//! - Blocking and async calling conventions for every operation

pub mod backend;
pub mod blocking;
pub mod codec;
pub mod config;
pub mod error;
pub mod lock;
pub mod registry;
pub mod value;

pub use backend::{CacheBackend, MemoryBackend, MemoryStats, RedisBackend, SqliteBackend};
pub use blocking::{BlockingCache, BlockingLock};
pub use codec::{Codec, CodecKind, JsonCodec, MsgPackCodec};
pub use config::{BackendConfig, MemoryConfig, RedisConfig, SqliteConfig};
pub use error::{CacheError, Result};
pub use lock::DistributedLock;
pub use registry::{BackendFactory, BackendRegistry};
pub use value::{CacheValue, KeysPage, TtlState};
