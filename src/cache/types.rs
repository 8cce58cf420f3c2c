use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Cache tier a read opted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTier {
    /// Never cached: every call is a live fetch
    Uncached,
    /// In-memory only (default)
    Memory,
    /// In-memory, persisted to the session-scoped channel
    SessionDurable,
    /// In-memory, persisted to the cross-session durable channel
    LocalDurable,
}

impl CacheTier {
    pub fn is_durable(self) -> bool {
        matches!(self, CacheTier::SessionDurable | CacheTier::LocalDurable)
    }
}

/// Key for cache entries
///
/// An ordered sequence of JSON-serializable parts, e.g. `["user", 7]`.
/// Equality and hashing are structural, via a canonical JSON encoding of
/// the parts (serde_json maps are ordered, so the encoding is stable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    parts: Vec<Value>,
}

impl CacheKey {
    pub fn new<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Canonical JSON form used for equality, hashing and logging
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.parts).unwrap_or_default()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

// JSON values carry no NaN, so structural equality is reflexive
impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Cache entry holding the last-fetched value for a key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: Value,
    pub tier: CacheTier,
    /// When the value was last fetched from the transport
    pub fetched_at: DateTime<Utc>,
    /// When the value was last read by a caller
    pub last_used_at: DateTime<Utc>,
    /// Optional fixed expiry, independent of the per-read freshness window
    pub expires_at: Option<DateTime<Utc>>,
    /// Marked by invalidation; a stale entry is never served as fresh
    pub stale: bool,
}

impl CacheEntry {
    pub fn new(key: CacheKey, data: Value, tier: CacheTier) -> Self {
        let now = Utc::now();
        Self {
            key,
            data,
            tier,
            fetched_at: now,
            last_used_at: now,
            expires_at: None,
            stale: false,
        }
    }

    /// Fresh within the given window: not stale, not past a fixed expiry,
    /// and fetched recently enough
    pub fn is_fresh(&self, valid_duration_ms: u64, now: DateTime<Utc>) -> bool {
        if self.stale {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return false;
            }
        }
        now - self.fetched_at < Duration::milliseconds(valid_duration_ms as i64)
    }

    /// How long the entry has gone unread
    pub fn unused_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_used_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structural_key_equality() {
        let a = CacheKey::new([json!("user"), json!(7)]);
        let b = CacheKey::new([json!("user"), json!(7)]);
        let c = CacheKey::new([json!("user"), json!(8)]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_key_with_object_variables() {
        let a = CacheKey::new([json!("getUser"), json!({"id": 7, "name": "x"})]);
        let b = CacheKey::new([json!("getUser"), json!({"name": "x", "id": 7})]);
        // serde_json maps are sorted, so field order does not matter
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_freshness_window() {
        let mut entry = CacheEntry::new(
            CacheKey::new([json!("k")]),
            json!({"v": 1}),
            CacheTier::Memory,
        );
        let now = entry.fetched_at;
        assert!(entry.is_fresh(1_000, now));
        assert!(!entry.is_fresh(1_000, now + Duration::milliseconds(1_000)));

        entry.stale = true;
        assert!(!entry.is_fresh(1_000, now));
    }

    #[test]
    fn test_fixed_expiry_overrides_window() {
        let mut entry = CacheEntry::new(
            CacheKey::new([json!("k")]),
            json!(1),
            CacheTier::Memory,
        );
        let now = entry.fetched_at;
        entry.expires_at = Some(now + Duration::milliseconds(10));
        assert!(entry.is_fresh(60_000, now));
        assert!(!entry.is_fresh(60_000, now + Duration::milliseconds(10)));
    }
}
