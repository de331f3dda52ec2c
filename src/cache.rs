//! Single-flight cache population and the per-course artifact cache.
//!
//! `get_or_set` is cache-aside with a companion population lock: on a miss,
//! one caller loads and writes while concurrent callers fall through to the
//! loader directly instead of queueing behind it. A busy lock is never an
//! error and never blocks a read.

use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::kv::{KeyValueStore, KvError};
use crate::mutex::{DistributedMutex, ReleaseGuard};

/// Suffix of the companion population lock for a cache key.
const POPULATION_LOCK_SUFFIX: &str = ":lock";

const STRUCT_SEGMENT: &str = "course_struct";
const OUTLINE_SEGMENT: &str = "course_outline";

fn decode(bytes: Vec<u8>) -> Result<String, KvError> {
    String::from_utf8(bytes).map_err(|err| KvError::Value(err.to_string()))
}

fn mode_segment(preview: bool) -> &'static str {
    if preview {
        "preview"
    } else {
        "pub"
    }
}

/// Cache-aside reader with single-flight population.
#[derive(Clone)]
pub struct SingleFlightCache<S: KeyValueStore + Clone> {
    store: S,
    lock_ttl: Duration,
}

impl<S: KeyValueStore + Clone> SingleFlightCache<S> {
    /// `lock_ttl` bounds how long a population lock can outlive its holder.
    pub fn new(store: S, lock_ttl: Duration) -> Self {
        Self { store, lock_ttl }
    }

    /// Read `key`, populating it from `loader` on a miss.
    ///
    /// At most one concurrent caller populates; the rest call the loader
    /// directly and skip the cache write, so a slow or crashed populator
    /// never blocks reads. `None` from the loader is returned as-is and
    /// never cached. Loaders must be idempotent reads.
    pub fn get_or_set<F>(
        &self,
        key: &str,
        loader: F,
        expire: Duration,
    ) -> Result<Option<String>, KvError>
    where
        F: FnOnce() -> Option<String>,
    {
        if let Some(bytes) = self.store.get(key)? {
            return Ok(Some(decode(bytes)?));
        }

        let lock_key = format!("{}{}", key, POPULATION_LOCK_SUFFIX);
        let mutex = DistributedMutex::new(self.store.clone(), lock_key, self.lock_ttl);
        if !mutex.acquire(false, Duration::ZERO)? {
            debug!(key, "population lock busy, loading directly");
            return Ok(loader());
        }

        let _guard = ReleaseGuard(&mutex);

        // A concurrent populator may have finished between the miss and the
        // acquire.
        if let Some(bytes) = self.store.get(key)? {
            return Ok(Some(decode(bytes)?));
        }

        let value = loader();
        if let Some(value) = &value {
            self.store.set(key, value.as_bytes(), Some(expire))?;
        }
        Ok(value)
    }
}

/// Cache for a course's derived structure and outline artifacts.
///
/// Key layout is `{prefix}{kind}:{mode}:{course id}` with kind
/// `course_struct` | `course_outline` and mode `preview` | `pub`, so the
/// four combinations never collide across courses or modes.
#[derive(Clone)]
pub struct StructCache<S: KeyValueStore + Clone> {
    cache: SingleFlightCache<S>,
    store: S,
    prefix: String,
}

impl<S: KeyValueStore + Clone> StructCache<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            cache: SingleFlightCache::new(store.clone(), config.lock_ttl),
            store,
            prefix: config.key_prefix.clone(),
        }
    }

    /// Cache key of the structure artifact for a course in a mode.
    pub fn struct_cache_key(&self, course_id: &str, preview: bool) -> String {
        format!(
            "{}{}:{}:{}",
            self.prefix,
            STRUCT_SEGMENT,
            mode_segment(preview),
            course_id
        )
    }

    /// Cache key of the outline artifact for a course in a mode.
    pub fn outline_cache_key(&self, course_id: &str, preview: bool) -> String {
        format!(
            "{}{}:{}:{}",
            self.prefix,
            OUTLINE_SEGMENT,
            mode_segment(preview),
            course_id
        )
    }

    /// Read the cached structure artifact, populating from `loader` on a miss.
    pub fn get_struct<F>(
        &self,
        course_id: &str,
        preview: bool,
        loader: F,
        expire: Duration,
    ) -> Result<Option<String>, KvError>
    where
        F: FnOnce() -> Option<String>,
    {
        self.cache
            .get_or_set(&self.struct_cache_key(course_id, preview), loader, expire)
    }

    /// Read the cached outline artifact, populating from `loader` on a miss.
    pub fn get_outline<F>(
        &self,
        course_id: &str,
        preview: bool,
        loader: F,
        expire: Duration,
    ) -> Result<Option<String>, KvError>
    where
        F: FnOnce() -> Option<String>,
    {
        self.cache
            .get_or_set(&self.outline_cache_key(course_id, preview), loader, expire)
    }

    /// Drop every cached artifact for a course: both kinds in both modes,
    /// present or not.
    pub fn delete_for(&self, course_id: &str) -> Result<(), KvError> {
        for preview in [true, false] {
            self.store.delete(&self.struct_cache_key(course_id, preview))?;
            self.store.delete(&self.outline_cache_key(course_id, preview))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use std::cell::Cell;

    const MINUTE: Duration = Duration::from_secs(60);

    fn cache(store: &InMemoryKvStore) -> SingleFlightCache<InMemoryKvStore> {
        SingleFlightCache::new(store.clone(), Duration::from_secs(5))
    }

    #[test]
    fn miss_populates_and_later_reads_hit() {
        let store = InMemoryKvStore::new();
        let cache = cache(&store);
        let calls = Cell::new(0);

        let loader = || {
            calls.set(calls.get() + 1);
            Some("v1".to_string())
        };
        assert_eq!(cache.get_or_set("k", loader, MINUTE).unwrap(), Some("v1".to_string()));
        assert_eq!(calls.get(), 1);

        let loader = || {
            calls.set(calls.get() + 1);
            Some("v2".to_string())
        };
        assert_eq!(cache.get_or_set("k", loader, MINUTE).unwrap(), Some("v1".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_from_loader_is_not_cached() {
        let store = InMemoryKvStore::new();
        let cache = cache(&store);
        let calls = Cell::new(0);

        for _ in 0..2 {
            let loader = || {
                calls.set(calls.get() + 1);
                None
            };
            assert_eq!(cache.get_or_set("k", loader, MINUTE).unwrap(), None);
        }
        assert_eq!(calls.get(), 2);
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn busy_lock_falls_through_without_writing() {
        let store = InMemoryKvStore::new();
        let cache = cache(&store);
        assert!(store.acquire_lock("k:lock", Duration::from_secs(30)).unwrap());

        let value = cache
            .get_or_set("k", || Some("direct".to_string()), MINUTE)
            .unwrap();
        assert_eq!(value, Some("direct".to_string()));
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn population_lock_is_released_after_a_miss() {
        let store = InMemoryKvStore::new();
        let cache = cache(&store);

        cache
            .get_or_set("k", || Some("v1".to_string()), MINUTE)
            .unwrap();
        assert!(store.acquire_lock("k:lock", Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn non_utf8_cached_bytes_are_a_value_error() {
        let store = InMemoryKvStore::new();
        let cache = cache(&store);
        store.set("k", &[0xff, 0xfe], None).unwrap();

        let err = cache
            .get_or_set("k", || Some("unused".to_string()), MINUTE)
            .unwrap_err();
        assert!(matches!(err, KvError::Value(_)));
    }

    #[test]
    fn derived_keys_do_not_collide() {
        let store = InMemoryKvStore::new();
        let cache = StructCache::new(store, &Config::default());

        let keys = [
            cache.struct_cache_key("c1", true),
            cache.struct_cache_key("c1", false),
            cache.outline_cache_key("c1", true),
            cache.outline_cache_key("c1", false),
            cache.struct_cache_key("c2", true),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(keys[0], "studykit:course_struct:preview:c1");
        assert_eq!(keys[3], "studykit:course_outline:pub:c1");
    }

    #[test]
    fn delete_for_clears_all_four_artifacts() {
        let store = InMemoryKvStore::new();
        let cache = StructCache::new(store.clone(), &Config::default());

        cache
            .get_struct("c1", true, || Some("s-preview".into()), MINUTE)
            .unwrap();
        cache
            .get_struct("c1", false, || Some("s-pub".into()), MINUTE)
            .unwrap();
        cache
            .get_outline("c1", true, || Some("o-preview".into()), MINUTE)
            .unwrap();
        cache
            .get_outline("c1", false, || Some("o-pub".into()), MINUTE)
            .unwrap();

        cache.delete_for("c1").unwrap();

        assert_eq!(store.get(&cache.struct_cache_key("c1", true)).unwrap(), None);
        assert_eq!(store.get(&cache.struct_cache_key("c1", false)).unwrap(), None);
        assert_eq!(store.get(&cache.outline_cache_key("c1", true)).unwrap(), None);
        assert_eq!(store.get(&cache.outline_cache_key("c1", false)).unwrap(), None);
    }

    #[test]
    fn delete_for_missing_entries_is_ok() {
        let store = InMemoryKvStore::new();
        let cache = StructCache::new(store, &Config::default());
        cache.delete_for("never-cached").unwrap();
    }
}
