//! DistributedMutex - named TTL locks over the shared key-value store.
//!
//! A mutex is a thin handle around one store key. Acquisition is the store's
//! atomic set-if-absent-with-expiry, so a crashed holder is bounded by the
//! TTL instead of leaking the lock. Failing to acquire is a normal outcome,
//! never an error: callers decide whether to skip, retry, or fall through.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::kv::{KeyValueStore, KvError};

/// How often a blocking acquire re-polls the store.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Named lock with a TTL, backed by a `KeyValueStore`.
pub struct DistributedMutex<S: KeyValueStore> {
    store: S,
    key: String,
    ttl: Duration,
}

impl<S: KeyValueStore> DistributedMutex<S> {
    pub fn new(store: S, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    /// The store key this mutex guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try to take the lock. Non-blocking tries once; blocking re-polls until
    /// `timeout` elapses. `Ok(false)` means another holder has it. Store
    /// errors propagate.
    pub fn acquire(&self, blocking: bool, timeout: Duration) -> Result<bool, KvError> {
        if self.store.acquire_lock(&self.key, self.ttl)? {
            return Ok(true);
        }
        if !blocking {
            return Ok(false);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(ACQUIRE_POLL_INTERVAL.min(deadline - now));
            if self.store.acquire_lock(&self.key, self.ttl)? {
                return Ok(true);
            }
        }
    }

    /// Release the lock. Best-effort: the TTL already bounds the critical
    /// section, so store errors here are logged and swallowed.
    pub fn release(&self) {
        if let Err(err) = self.store.release_lock(&self.key) {
            debug!(key = %self.key, error = %err, "lock release failed");
        }
    }
}

/// Releases the mutex on drop, so the unlock runs on panic and early return
/// alike.
pub(crate) struct ReleaseGuard<'a, S: KeyValueStore>(pub(crate) &'a DistributedMutex<S>);

impl<S: KeyValueStore> Drop for ReleaseGuard<'_, S> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Run `f` only if the named lock is free, for scheduled or triggered work
/// that must not run twice concurrently. Returns `Ok(None)` when another
/// holder has the lock. The lock is released even if `f` panics.
pub fn run_exclusive<S, T, F>(
    store: S,
    key: &str,
    ttl: Duration,
    f: F,
) -> Result<Option<T>, KvError>
where
    S: KeyValueStore,
    F: FnOnce() -> T,
{
    let mutex = DistributedMutex::new(store, key, ttl);
    if !mutex.acquire(false, Duration::ZERO)? {
        info!(key, "lock busy, skipping");
        return Ok(None);
    }

    let _guard = ReleaseGuard(&mutex);
    Ok(Some(f()))
}
