//! RedisKvStore - networked backend behind the `redis` feature.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::{Client, Commands, Connection};

use super::{KeyValueStore, KvError};

fn backend(err: redis::RedisError) -> KvError {
    KvError::Backend(err.to_string())
}

/// Millisecond expiry for SET PX and lock TTLs. Redis rejects PX 0.
fn px_millis(expire: Duration) -> u64 {
    expire.as_millis().max(1) as u64
}

/// Key-value store over a single Redis connection.
///
/// Operations serialize on the connection; clones share it. Build one handle
/// per thread with `connect` when that matters. Locks are SET NX PX keys, so
/// acquisition is atomic on the server and abandoned locks expire on their
/// own.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: Arc<Mutex<Connection>>,
}

impl RedisKvStore {
    /// Connect to a Redis URL, e.g. `redis://127.0.0.1:6379/0`.
    pub fn connect(url: &str) -> Result<Self, KvError> {
        let client = Client::open(url).map_err(backend)?;
        let connection = client.get_connection().map_err(backend)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, KvError> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| KvError::Poisoned("connection"))?;
        f(&mut connection).map_err(backend)
    }
}

impl KeyValueStore for RedisKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.with_connection(|con| con.get(key))
    }

    fn set(&self, key: &str, value: &[u8], expire: Option<Duration>) -> Result<(), KvError> {
        self.with_connection(|con| match expire {
            Some(expire) => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(px_millis(expire))
                .query(con),
            None => con.set(key, value),
        })
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.with_connection(|con| con.del::<_, i64>(key))?;
        Ok(())
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let millis = self.with_connection(|con| redis::cmd("PTTL").arg(key).query::<i64>(con))?;
        // -2 is a missing key, -1 a key with no expiry.
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.with_connection(|con| con.incr(key, 1))
    }

    fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let reply = self.with_connection(|con| {
            redis::cmd("SET")
                .arg(key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(px_millis(ttl))
                .query::<Option<String>>(con)
        })?;
        Ok(reply.is_some())
    }

    fn release_lock(&self, key: &str) -> Result<(), KvError> {
        self.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_millis_never_zero() {
        assert_eq!(px_millis(Duration::ZERO), 1);
        assert_eq!(px_millis(Duration::from_millis(250)), 250);
        assert_eq!(px_millis(Duration::from_secs(5)), 5_000);
    }

    #[test]
    fn connect_to_unreachable_url_fails() {
        // Invalid scheme fails at client setup without touching the network.
        let err = RedisKvStore::connect("not-a-redis-url").unwrap_err();
        assert!(matches!(err, KvError::Backend(_)));
    }
}
