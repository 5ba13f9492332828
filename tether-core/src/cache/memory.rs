use crate::{CacheAdapter, CachePolicy, CacheValue, Result};
use std::{
    collections::HashMap,
    fmt::{self, Debug},
    sync::{Arc, Mutex, MutexGuard},
};
use time::OffsetDateTime;

pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

struct Entry {
    value: CacheValue,
    policy: Option<CachePolicy>,
    last_access: OffsetDateTime,
}

impl Entry {
    fn expired(&self, now: OffsetDateTime) -> bool {
        let Some(policy) = &self.policy else {
            return false;
        };
        if policy.absolute_expiration.is_some_and(|v| now >= v) {
            return true;
        }
        if let Some(sliding) = policy.sliding_expiration {
            let elapsed = now - self.last_access;
            return elapsed.is_positive() && elapsed.unsigned_abs() >= sliding;
        }
        false
    }
}

/// In-process cache adapter.
///
/// Expired entries are dropped lazily when read. Reading an entry renews its sliding window.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Clock,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(OffsetDateTime::now_utc))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: Default::default(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = (self.clock)();
        self.entries().get(key).is_some_and(|v| !v.expired(now))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Every mutation is a single map operation, a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl CacheAdapter for MemoryCache {
    fn try_read(&self, key: &str) -> Result<Option<CacheValue>> {
        let now = (self.clock)();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.expired(now) {
            log::debug!("Cache entry `{}` expired", key);
            entries.remove(key);
            return Ok(None);
        }
        entry.last_access = now;
        Ok(Some(entry.value.clone()))
    }

    fn write(&self, key: &str, value: CacheValue, policy: Option<&CachePolicy>) -> Result<()> {
        let now = (self.clock)();
        self.entries().insert(
            key.to_owned(),
            Entry {
                value,
                policy: policy.copied(),
                last_access: now,
            },
        );
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicI64, Ordering},
        time::Duration,
    };

    fn manual_clock() -> (Arc<AtomicI64>, Clock) {
        let seconds = Arc::new(AtomicI64::new(1_700_000_000));
        let reader = seconds.clone();
        let clock: Clock = Arc::new(move || {
            OffsetDateTime::from_unix_timestamp(reader.load(Ordering::Relaxed))
                .expect("valid timestamp")
        });
        (seconds, clock)
    }

    #[test]
    fn null_round_trip() {
        let cache = MemoryCache::new();
        assert!(cache.try_read("missing").unwrap().is_none());
        cache.write("null", CacheValue::Null, None).unwrap();
        let value = cache.try_read("null").unwrap().expect("the null should be found");
        assert!(value.is_null());
    }

    #[test]
    fn absolute_expiration() {
        let (seconds, clock) = manual_clock();
        let cache = MemoryCache::with_clock(clock.clone());
        let policy = CachePolicy::absolute(clock() + Duration::from_secs(60));
        cache
            .write("key", CacheValue::new(5_i32), Some(&policy))
            .unwrap();
        seconds.fetch_add(59, Ordering::Relaxed);
        assert!(cache.contains_key("key"));
        seconds.fetch_add(1, Ordering::Relaxed);
        assert!(cache.try_read("key").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn sliding_expiration() {
        let (seconds, clock) = manual_clock();
        let cache = MemoryCache::with_clock(clock);
        let policy = CachePolicy::sliding(Duration::from_secs(10));
        cache
            .write("key", CacheValue::new("value".to_string()), Some(&policy))
            .unwrap();
        for _ in 0..5 {
            seconds.fetch_add(9, Ordering::Relaxed);
            let value = cache.try_read("key").unwrap().expect("renewed by the read");
            assert_eq!(value.downcast_ref::<String>().unwrap(), "value");
        }
        seconds.fetch_add(10, Ordering::Relaxed);
        assert!(cache.try_read("key").unwrap().is_none());
    }
}
