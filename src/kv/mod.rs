//! Key-value store seam - the shared backend for caching, one-time codes,
//! and named locks.
//!
//! Components take a store handle at construction and never reach for a
//! global. `InMemoryKvStore` backs tests and development; the `redis`
//! feature adds a networked backend behind the same trait.

mod in_memory;
#[cfg(feature = "redis")]
mod redis;

use std::fmt;
use std::time::Duration;

use crate::mutex::DistributedMutex;

/// Error type for key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Backend-level failure (connectivity, protocol, server error).
    Backend(String),
    /// A std lock guarding in-process state was poisoned.
    Poisoned(&'static str),
    /// A stored value could not be decoded as the expected type.
    Value(String),
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::Backend(msg) => write!(f, "key-value backend error: {}", msg),
            KvError::Poisoned(what) => write!(f, "{} lock poisoned", what),
            KvError::Value(msg) => write!(f, "invalid stored value: {}", msg),
        }
    }
}

impl std::error::Error for KvError {}

/// Shared key-value store with expiring keys and atomic named locks.
///
/// `acquire_lock` must be an atomic set-if-absent-with-expiry: two concurrent
/// callers can never both observe `true` for the same live key. Everything
/// else is plain keyed byte storage.
pub trait KeyValueStore: Send + Sync {
    /// Get raw bytes by key. A missing key is `Ok(None)`, never an error.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Set raw bytes, optionally expiring after `expire`.
    fn set(&self, key: &str, value: &[u8], expire: Option<Duration>) -> Result<(), KvError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Remaining time to live. `None` means the key is missing or never expires.
    fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    /// Increment an integer value, counting from zero for a missing key.
    /// Any expiry already on the key is preserved; non-numeric contents are
    /// an error.
    fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Atomically take the named lock if it is free, expiring it after `ttl`.
    /// Returns `false` when another holder has it.
    fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Drop the named lock.
    fn release_lock(&self, key: &str) -> Result<(), KvError>;

    /// Named-lock factory over this store.
    fn lock(&self, key: &str, ttl: Duration) -> DistributedMutex<Self>
    where
        Self: Clone + Sized,
    {
        DistributedMutex::new(self.clone(), key, ttl)
    }
}

pub use in_memory::InMemoryKvStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKvStore;
