//! Expiring in-memory cache keyed by the raw question text.
//!
//! Expiry is lazy: an entry read at or after its deadline is removed and reported as a
//! miss. [`TtlCache::purge_expired`] sweeps everything that has lapsed. Time comes from a
//! [`Clock`] so tests can move it forward by hand.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::*;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a clone of the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                trace!("Cache entry expired: {:?}", key);
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// A deadline past the representable range is clamped to the latest instant.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .lock()
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cache() -> (Arc<ManualClock>, TtlCache<String>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let cache = TtlCache::new(Duration::seconds(300), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_hit_before_expiry() {
        let (clock, cache) = cache();
        cache.insert("q", "answer".to_string());
        clock.advance(Duration::seconds(299));
        assert_eq!(cache.get("q").as_deref(), Some("answer"));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn test_expiry_is_inclusive_and_evicts() {
        let (clock, cache) = cache();
        cache.insert("q", "answer".to_string());
        clock.advance(Duration::seconds(300));
        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rewrite_resets_deadline() {
        let (clock, cache) = cache();
        cache.insert("q", "first".to_string());
        clock.advance(Duration::seconds(200));
        cache.insert("q", "second".to_string());
        clock.advance(Duration::seconds(200));
        assert_eq!(cache.get("q").as_deref(), Some("second"));
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let (_clock, cache) = cache();
        cache.insert_with_ttl("q", "answer".to_string(), Duration::zero());
        assert_eq!(cache.get("q"), None);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let (clock, cache) = cache();
        cache.insert_with_ttl("q", "answer".to_string(), Duration::seconds(1_000_000_000_000_000));
        clock.advance(Duration::days(365 * 1000));
        assert_eq!(cache.get("q").as_deref(), Some("answer"));
    }

    #[test]
    fn test_purge_expired() {
        let (clock, cache) = cache();
        cache.insert_with_ttl("short", "a".to_string(), Duration::seconds(10));
        cache.insert("long", "b".to_string());
        clock.advance(Duration::seconds(60));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
