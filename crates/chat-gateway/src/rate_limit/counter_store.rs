//! Window counters behind a store trait.
//!
//! The in-memory store keeps one entry per key in a `DashMap`. A multi-process
//! deployment swaps in a shared store without touching `RateLimiter`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Increments between sweeps of expired entries.
pub const DEFAULT_PURGE_INTERVAL: u64 = 256;

/// Fixed-window counter for one (capability, identity) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of one `increment` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
    pub admitted: bool,
}

pub trait CounterStore: Send + Sync {
    /// Count one request against `key`.
    ///
    /// Starts a fresh window when none exists or the current one has elapsed.
    /// When the count already sits at `ceiling` the entry is left untouched and
    /// `admitted` is false. The read-modify-write is atomic per key.
    fn increment(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> WindowCount;

    fn reset(&self, key: &str);
}

pub struct InMemoryCounterStore {
    entries: DashMap<String, RateLimitEntry>,
    calls: AtomicU64,
    purge_interval: u64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries once every `interval` increments (minimum 1).
    pub fn with_purge_interval(interval: u64) -> Self {
        Self {
            entries: DashMap::new(),
            calls: AtomicU64::new(0),
            purge_interval: interval.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.reset_at > now);
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> WindowCount {
        // Must run before taking the entry guard: retain locks every shard.
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call % self.purge_interval == 0 {
            self.purge_expired(now);
        }

        // The entry guard holds the shard write lock until it drops.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry { count: 0, reset_at: now + window });

        if entry.reset_at <= now {
            *entry = RateLimitEntry { count: 0, reset_at: now + window };
        }

        if entry.count >= ceiling {
            return WindowCount {
                count: entry.count,
                reset_at: entry.reset_at,
                admitted: false,
            };
        }

        entry.count += 1;
        WindowCount {
            count: entry.count,
            reset_at: entry.reset_at,
            admitted: true,
        }
    }

    fn reset(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_increment_opens_window() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let window = Duration::seconds(60);

        let result = store.increment("k", 3, window, now);
        assert!(result.admitted);
        assert_eq!(result.count, 1);
        assert_eq!(result.reset_at, now + window);
    }

    #[test]
    fn test_denied_increment_does_not_mutate() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let window = Duration::seconds(60);

        store.increment("k", 1, window, now);
        let before = store.get("k").unwrap();

        let denied = store.increment("k", 1, window, now + Duration::seconds(5));
        assert!(!denied.admitted);
        assert_eq!(store.get("k").unwrap(), before);
    }

    #[test]
    fn test_expired_entries_are_purged_on_interval() {
        let store = InMemoryCounterStore::with_purge_interval(3);
        let now = Utc::now();
        let window = Duration::seconds(10);

        store.increment("a", 5, window, now);
        store.increment("b", 5, window, now);
        assert_eq!(store.len(), 2);

        store.increment("c", 5, window, now + Duration::seconds(11));
        assert_eq!(store.len(), 1);
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_purge_skipped_between_intervals() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let window = Duration::seconds(10);

        store.increment("a", 5, window, now);
        store.increment("b", 5, window, now);
        store.increment("c", 5, window, now + Duration::seconds(11));
        assert_eq!(store.len(), 3);

        // Stale entries still restart their window when touched.
        let reopened = store.increment("a", 1, window, now + Duration::seconds(12));
        assert!(reopened.admitted);
        assert_eq!(reopened.count, 1);
    }

    #[test]
    fn test_default_interval_sweeps_eventually() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let window = Duration::seconds(10);

        store.increment("stale", 5, window, now);
        let later = now + Duration::seconds(11);
        for _ in 1..DEFAULT_PURGE_INTERVAL {
            store.increment("fresh", u32::MAX, window, later);
        }
        assert!(store.get("stale").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reset_clears_key() {
        let store = InMemoryCounterStore::new();
        store.increment("k", 5, Duration::seconds(60), Utc::now());
        store.reset("k");
        assert!(store.is_empty());
    }
}
