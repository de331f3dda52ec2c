//! InMemoryKvStore - HashMap-backed key-value store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::{KeyValueStore, KvError};

/// Internal stored representation of a value.
#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// In-memory key-value store backed by a HashMap.
///
/// Expiry is deadline-based and checked on read, so an expired key behaves
/// exactly like a missing one. Named locks are ordinary entries, which keeps
/// set-if-absent semantics identical to a networked backend. Clone-friendly
/// via Arc.
#[derive(Clone)]
pub struct InMemoryKvStore {
    storage: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| KvError::Poisoned("storage"))?;

        let now = Instant::now();
        Ok(storage
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.bytes.clone()))
    }

    fn set(&self, key: &str, value: &[u8], expire: Option<Duration>) -> Result<(), KvError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| KvError::Poisoned("storage"))?;

        storage.insert(
            key.to_string(),
            Entry {
                bytes: value.to_vec(),
                deadline: expire.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| KvError::Poisoned("storage"))?;

        storage.remove(key);
        Ok(())
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| KvError::Poisoned("storage"))?;

        let now = Instant::now();
        Ok(storage
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.deadline)
            .map(|deadline| deadline - now))
    }

    fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| KvError::Poisoned("storage"))?;

        let now = Instant::now();
        let (current, deadline) = match storage.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => {
                let text = std::str::from_utf8(&entry.bytes)
                    .map_err(|_| KvError::Value(format!("{} does not hold an integer", key)))?;
                let count: i64 = text
                    .trim()
                    .parse()
                    .map_err(|_| KvError::Value(format!("{} does not hold an integer", key)))?;
                (count, entry.deadline)
            }
            None => (0, None),
        };

        let next = current + 1;
        storage.insert(
            key.to_string(),
            Entry {
                bytes: next.to_string().into_bytes(),
                deadline,
            },
        );
        Ok(next)
    }

    fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| KvError::Poisoned("storage"))?;

        let now = Instant::now();
        if storage.get(key).map_or(false, |entry| entry.is_live(now)) {
            return Ok(false);
        }

        storage.insert(
            key.to_string(),
            Entry {
                bytes: b"1".to_vec(),
                deadline: Some(now + ttl),
            },
        );
        Ok(true)
    }

    fn release_lock(&self, key: &str) -> Result<(), KvError> {
        self.delete(key)
    }
}
