use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Stored value with its insertion metadata
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    inserted_at: DateTime<Utc>,
    ttl_override: Option<Duration>,
    seq: u64,
}

impl<V> CacheEntry<V> {
    /// An entry is absent once `now - inserted_at >= ttl`
    fn is_expired(&self, default_ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = self.ttl_override.unwrap_or(default_ttl);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        (now - self.inserted_at).num_milliseconds() >= ttl_ms
    }
}

#[derive(Debug)]
struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> StoreInner<V> {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    fn evict_to(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
    /// Entry existed but had outlived its TTL and was purged
    Expired,
}

impl<V> Lookup<V> {
    pub fn into_option(self) -> Option<V> {
        match self {
            Lookup::Hit(data) => Some(data),
            Lookup::Miss | Lookup::Expired => None,
        }
    }
}

/// Keyed store with per-entry TTL and a FIFO size bound
///
/// Eviction follows insertion order, not access recency. Re-setting a key
/// moves it to the back of the queue.
#[derive(Debug)]
pub struct TtlStore<V> {
    inner: Mutex<StoreInner<V>>,
}

impl<V: Clone> TtlStore<V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Look up a key, purging it if it has expired
    pub fn get(&self, key: &str, default_ttl: Duration, now: DateTime<Utc>) -> Lookup<V> {
        let mut inner = self.inner.lock();

        match inner.entries.get(key) {
            None => return Lookup::Miss,
            Some(entry) if !entry.is_expired(default_ttl, now) => {
                return Lookup::Hit(entry.data.clone());
            }
            Some(_) => {}
        }

        inner.remove(key);
        Lookup::Expired
    }

    /// Insert a value and return how many entries the size bound evicted
    pub fn insert(
        &self,
        key: String,
        data: V,
        ttl_override: Option<Duration>,
        now: DateTime<Utc>,
        max_entries: usize,
    ) -> usize {
        let mut inner = self.inner.lock();
        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                data,
                inserted_at: now,
                ttl_override,
                seq,
            },
        );

        inner.evict_to(max_entries)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key)
    }

    /// Remove every key that starts with `prefix`
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    /// Physically delete expired entries
    pub fn sweep(&self, default_ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(default_ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Apply a (possibly lowered) size bound to existing entries
    pub fn enforce_bound(&self, max_entries: usize) -> usize {
        self.inner.lock().evict_to(max_entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl<V: Clone> Default for TtlStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_entry_expires_exactly_at_ttl() {
        let store = TtlStore::new();
        let ttl = Duration::from_secs(60);
        store.insert("k".to_string(), 1, None, t0(), 10);

        let just_before = t0() + chrono::Duration::milliseconds(59_999);
        assert_eq!(store.get("k", ttl, just_before), Lookup::Hit(1));

        let at_ttl = t0() + chrono::Duration::seconds(60);
        assert_eq!(store.get("k", ttl, at_ttl), Lookup::Expired);
        assert!(!store.contains_key("k"));
    }

    #[test]
    fn test_override_ttl_wins() {
        let store = TtlStore::new();
        store.insert("k".to_string(), "v", Some(Duration::from_secs(5)), t0(), 10);

        let later = t0() + chrono::Duration::seconds(6);
        assert_eq!(store.get("k", Duration::from_secs(3600), later), Lookup::Expired);
    }

    #[test]
    fn test_reinsert_moves_key_to_back() {
        let store = TtlStore::new();
        let ttl = Duration::from_secs(60);
        store.insert("a".to_string(), 1, None, t0(), 2);
        store.insert("b".to_string(), 2, None, t0(), 2);
        store.insert("a".to_string(), 3, None, t0(), 2);

        let evicted = store.insert("c".to_string(), 4, None, t0(), 2);
        assert_eq!(evicted, 1);
        assert_eq!(store.get("b", ttl, t0()), Lookup::Miss);
        assert_eq!(store.get("a", ttl, t0()), Lookup::Hit(3));
    }

    #[test]
    fn test_sweep_and_prefix_removal() {
        let store = TtlStore::new();
        store.insert("search_t1_a".to_string(), 1, None, t0(), 10);
        store.insert("search_t1_b".to_string(), 2, Some(Duration::from_secs(1)), t0(), 10);
        store.insert("search_t2_a".to_string(), 3, None, t0(), 10);

        let swept = store.sweep(Duration::from_secs(60), t0() + chrono::Duration::seconds(2));
        assert_eq!(swept, 1);

        assert_eq!(store.remove_prefix("search_t1_"), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains_key("search_t2_a"));
    }
}
