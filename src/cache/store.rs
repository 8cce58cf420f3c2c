use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use super::types::{CacheEntry, CacheKey, CacheTier};

/// In-memory tiered cache store
///
/// The single shared mutable structure behind the request engine. External
/// callers go through the documented surface (set/invalidate/remove/reset/
/// clear); only the engine creates entries from fetch results.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a non-stale, non-expired value and touch its last-used time.
    /// Freshness windows are the engine's concern; `get` only refuses
    /// entries that have been invalidated or passed a fixed expiry.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if entry.stale {
            return None;
        }
        if let Some(expires_at) = entry.expires_at {
            if now >= expires_at {
                return None;
            }
        }
        entry.last_used_at = now;
        Some(entry.data.clone())
    }

    /// Read the raw entry without freshness judgement or touching
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a value under a key, replacing any previous entry.
    /// `Uncached` values are never stored.
    pub fn set(&self, key: CacheKey, data: Value, tier: CacheTier) {
        if tier == CacheTier::Uncached {
            return;
        }
        let entry = CacheEntry::new(key.clone(), data, tier);
        self.entries.lock().insert(key, entry);
    }

    /// Insert a prebuilt entry (refetch updates, hydration)
    pub fn insert_entry(&self, entry: CacheEntry) {
        if entry.tier == CacheTier::Uncached {
            return;
        }
        self.entries.lock().insert(entry.key.clone(), entry);
    }

    /// Mark an entry stale. Returns whether an entry existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Delete an entry outright
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Clear entries and treat them as never fetched. `None` resets
    /// everything, otherwise only the given keys.
    pub fn reset(&self, keys: Option<&[CacheKey]>) {
        let mut entries = self.entries.lock();
        match keys {
            Some(keys) => {
                for key in keys {
                    entries.remove(key);
                }
            }
            None => entries.clear(),
        }
    }

    /// Wipe the whole in-memory store
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Evict entries unread for longer than the retention window.
    /// Returns the number of evicted entries.
    pub fn sweep_unused(&self, retention_ms: u64) -> usize {
        let now = Utc::now();
        let retention = Duration::milliseconds(retention_ms as i64);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.unused_for(now) < retention);
        before - entries.len()
    }

    /// Snapshot of all entries tagged with a tier (persistence bridge)
    pub fn entries_for_tier(&self, tier: CacheTier) -> Vec<CacheEntry> {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.tier == tier)
            .cloned()
            .collect()
    }

    /// Load previously persisted entries, without clobbering newer data
    pub fn hydrate(&self, restored: Vec<CacheEntry>) {
        let mut entries = self.entries.lock();
        for entry in restored {
            entries.entry(entry.key.clone()).or_insert(entry);
        }
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::new([json!(name)])
    }

    #[test]
    fn test_set_get_roundtrip() {
        let store = CacheStore::new();
        store.set(key("a"), json!({"v": 1}), CacheTier::Memory);
        assert_eq!(store.get(&key("a")), Some(json!({"v": 1})));
        assert_eq!(store.get(&key("b")), None);
    }

    #[test]
    fn test_uncached_is_never_stored() {
        let store = CacheStore::new();
        store.set(key("a"), json!(1), CacheTier::Uncached);
        assert!(store.is_empty());
        assert_eq!(store.get(&key("a")), None);
    }

    #[test]
    fn test_invalidate_hides_entry_from_get() {
        let store = CacheStore::new();
        store.set(key("a"), json!(1), CacheTier::Memory);
        assert!(store.invalidate(&key("a")));
        // Entry still exists for refetch bookkeeping but is never served
        assert!(store.peek(&key("a")).is_some());
        assert_eq!(store.get(&key("a")), None);
        assert!(!store.invalidate(&key("missing")));
    }

    #[test]
    fn test_remove_and_reset() {
        let store = CacheStore::new();
        store.set(key("a"), json!(1), CacheTier::Memory);
        store.set(key("b"), json!(2), CacheTier::Memory);
        store.set(key("c"), json!(3), CacheTier::Memory);

        assert!(store.remove(&key("a")));
        assert_eq!(store.len(), 2);

        store.reset(Some(&[key("b")]));
        assert_eq!(store.len(), 1);

        store.reset(None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_unused() {
        let store = CacheStore::new();
        store.set(key("old"), json!(1), CacheTier::Memory);
        store.set(key("new"), json!(2), CacheTier::Memory);

        // Backdate one entry's last use past the retention window
        {
            let mut entry = store.peek(&key("old")).unwrap();
            entry.last_used_at = Utc::now() - Duration::milliseconds(10_000);
            store.insert_entry(entry);
        }

        let evicted = store.sweep_unused(5_000);
        assert_eq!(evicted, 1);
        assert!(store.peek(&key("old")).is_none());
        assert!(store.peek(&key("new")).is_some());
    }

    #[test]
    fn test_entries_for_tier_filtering() {
        let store = CacheStore::new();
        store.set(key("m"), json!(1), CacheTier::Memory);
        store.set(key("s"), json!(2), CacheTier::SessionDurable);
        store.set(key("l"), json!(3), CacheTier::LocalDurable);

        let session = store.entries_for_tier(CacheTier::SessionDurable);
        assert_eq!(session.len(), 1);
        assert_eq!(session[0].key, key("s"));

        assert_eq!(store.entries_for_tier(CacheTier::Uncached).len(), 0);
    }

    #[test]
    fn test_hydrate_does_not_clobber_live_entries() {
        let store = CacheStore::new();
        store.set(key("a"), json!("live"), CacheTier::LocalDurable);

        let restored = vec![
            CacheEntry::new(key("a"), json!("persisted"), CacheTier::LocalDurable),
            CacheEntry::new(key("b"), json!("persisted"), CacheTier::LocalDurable),
        ];
        store.hydrate(restored);

        assert_eq!(store.get(&key("a")), Some(json!("live")));
        assert_eq!(store.get(&key("b")), Some(json!("persisted")));
    }
}
