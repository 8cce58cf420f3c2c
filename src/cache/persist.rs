use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::store::CacheStore;
use super::types::{CacheEntry, CacheKey, CacheTier};
use crate::app::NetworkConfig;
use crate::constants::{LOCAL_CACHE_FILE, SESSION_CACHE_FILE};
use crate::utils::NetworkError;

/// The two independent durable-storage channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableChannel {
    /// Tab/process-lifetime storage
    Session,
    /// Cross-session storage
    Local,
}

impl DurableChannel {
    /// The cache tier that opts an entry into this channel
    pub fn tier(self) -> CacheTier {
        match self {
            DurableChannel::Session => CacheTier::SessionDurable,
            DurableChannel::Local => CacheTier::LocalDurable,
        }
    }
}

/// Flat record shape written to disk. JSON payloads are stored as strings
/// because bincode cannot round-trip untyped `serde_json::Value`s.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    data: String,
    tier: CacheTier,
    fetched_at_ms: i64,
    last_used_at_ms: i64,
    expires_at_ms: Option<i64>,
    stale: bool,
}

impl PersistedEntry {
    fn from_entry(entry: &CacheEntry) -> Result<Self, NetworkError> {
        Ok(Self {
            key: serde_json::to_string(entry.key.parts())?,
            data: serde_json::to_string(&entry.data)?,
            tier: entry.tier,
            fetched_at_ms: entry.fetched_at.timestamp_millis(),
            last_used_at_ms: entry.last_used_at.timestamp_millis(),
            expires_at_ms: entry.expires_at.map(|t| t.timestamp_millis()),
            stale: entry.stale,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, NetworkError> {
        let parts: Vec<serde_json::Value> = serde_json::from_str(&self.key)?;
        let from_ms = |ms: i64| -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
        };
        Ok(CacheEntry {
            key: CacheKey::new(parts),
            data: serde_json::from_str(&self.data)?,
            tier: self.tier,
            fetched_at: from_ms(self.fetched_at_ms),
            last_used_at: from_ms(self.last_used_at_ms),
            expires_at: self.expires_at_ms.map(from_ms),
            stale: self.stale,
        })
    }
}

/// Serializes opted-in cache entries to durable storage and restores them
/// on startup. Best-effort by contract: storage failures are logged and
/// absorbed, never surfaced to the request flow.
#[derive(Debug)]
pub struct PersistenceBridge {
    enabled: bool,
    session_path: PathBuf,
    local_path: PathBuf,
}

impl PersistenceBridge {
    pub fn new(config: &NetworkConfig) -> Self {
        let session_dir = config
            .cache
            .session_dir
            .clone()
            .unwrap_or_else(default_session_dir);
        let local_dir = config
            .cache
            .local_dir
            .clone()
            .unwrap_or_else(default_local_dir);

        // Persistence is a client-runtime concern only
        let enabled = !config.server_side;
        if enabled {
            for dir in [&session_dir, &local_dir] {
                if let Err(e) = fs::create_dir_all(dir) {
                    warn!("Failed to create cache directory {}: {}", dir.display(), e);
                }
            }
        }

        Self {
            enabled,
            session_path: session_dir.join(SESSION_CACHE_FILE),
            local_path: local_dir.join(LOCAL_CACHE_FILE),
        }
    }

    fn path(&self, channel: DurableChannel) -> &Path {
        match channel {
            DurableChannel::Session => &self.session_path,
            DurableChannel::Local => &self.local_path,
        }
    }

    /// Write every entry tagged for the channel's tier as one blob
    pub fn persist(&self, store: &CacheStore, channel: DurableChannel) {
        if !self.enabled {
            return;
        }
        let entries = store.entries_for_tier(channel.tier());
        if let Err(e) = save_blob(self.path(channel), &entries) {
            warn!(
                "Failed to persist {} cache entries to {}: {}",
                entries.len(),
                self.path(channel).display(),
                e
            );
        }
    }

    /// Flush both channels
    pub fn persist_all(&self, store: &CacheStore) {
        self.persist(store, DurableChannel::Session);
        self.persist(store, DurableChannel::Local);
    }

    /// Load both channels into the store (startup / simulated reload).
    /// Unreadable blobs yield an empty restore, never an error.
    pub fn restore(&self, store: &CacheStore) {
        if !self.enabled {
            return;
        }
        for channel in [DurableChannel::Session, DurableChannel::Local] {
            match load_blob(self.path(channel)) {
                Ok(entries) => {
                    // Only entries tagged for this channel survive a reload
                    let tier = channel.tier();
                    let entries: Vec<_> =
                        entries.into_iter().filter(|e| e.tier == tier).collect();
                    debug!(
                        "Restored {} entries from {}",
                        entries.len(),
                        self.path(channel).display()
                    );
                    store.hydrate(entries);
                }
                Err(e) => {
                    warn!(
                        "Failed to restore cache from {}: {}",
                        self.path(channel).display(),
                        e
                    );
                }
            }
        }
    }

    /// Remove the serialized blob for one channel, or both
    pub fn clear(&self, channel: Option<DurableChannel>) {
        let channels = match channel {
            Some(c) => vec![c],
            None => vec![DurableChannel::Session, DurableChannel::Local],
        };
        for channel in channels {
            let path = self.path(channel);
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Failed to clear persisted cache {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Byte size of the currently persisted blob, 0 on any failure
    pub fn size_in_bytes(&self, channel: DurableChannel) -> u64 {
        if !self.enabled {
            return 0;
        }
        fs::metadata(self.path(channel))
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Serialize and compress entries into one blob file
fn save_blob(path: &Path, entries: &[CacheEntry]) -> Result<(), NetworkError> {
    let records: Vec<PersistedEntry> = entries
        .iter()
        .map(PersistedEntry::from_entry)
        .collect::<Result<_, _>>()?;
    let serialized =
        bincode::serialize(&records).map_err(|e| NetworkError::Storage(e.to_string()))?;
    let compressed = lz4::block::compress(&serialized, None, true)
        .map_err(|e| NetworkError::Storage(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| NetworkError::Storage(e.to_string()))?;
    }
    fs::write(path, compressed).map_err(|e| NetworkError::Storage(e.to_string()))
}

/// Read and decode one blob file; a missing file is an empty cache
fn load_blob(path: &Path) -> Result<Vec<CacheEntry>, NetworkError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let compressed = fs::read(path).map_err(|e| NetworkError::Storage(e.to_string()))?;
    let serialized = lz4::block::decompress(&compressed, None)
        .map_err(|e| NetworkError::Storage(e.to_string()))?;
    let records: Vec<PersistedEntry> =
        bincode::deserialize(&serialized).map_err(|e| NetworkError::Storage(e.to_string()))?;
    records.into_iter().map(PersistedEntry::into_entry).collect()
}

fn default_session_dir() -> PathBuf {
    // Stands in for tab-lifetime session storage: scoped to this process
    std::env::temp_dir().join(format!("reqcache-session-{}", std::process::id()))
}

fn default_local_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "reqcache") {
        proj_dirs.cache_dir().to_path_buf()
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".cache").join("reqcache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(dir: &Path) -> NetworkConfig {
        let mut config = NetworkConfig::default();
        config.cache.session_dir = Some(dir.join("session"));
        config.cache.local_dir = Some(dir.join("local"));
        config
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new([json!(name)])
    }

    #[test]
    fn test_roundtrip_filters_by_tier() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let bridge = PersistenceBridge::new(&config);

        let store = CacheStore::new();
        store.set(key("mem"), json!(1), CacheTier::Memory);
        store.set(key("session"), json!(2), CacheTier::SessionDurable);
        store.set(key("local"), json!(3), CacheTier::LocalDurable);
        bridge.persist_all(&store);

        // Simulated reload: a fresh store populated only from disk
        let reloaded = CacheStore::new();
        bridge.restore(&reloaded);

        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&key("session")), Some(json!(2)));
        assert_eq!(reloaded.get(&key("local")), Some(json!(3)));
        assert!(reloaded.peek(&key("mem")).is_none());
    }

    #[test]
    fn test_clear_single_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let bridge = PersistenceBridge::new(&config);

        let store = CacheStore::new();
        store.set(key("s"), json!(1), CacheTier::SessionDurable);
        store.set(key("l"), json!(2), CacheTier::LocalDurable);
        bridge.persist_all(&store);

        assert!(bridge.size_in_bytes(DurableChannel::Session) > 0);
        bridge.clear(Some(DurableChannel::Session));
        assert_eq!(bridge.size_in_bytes(DurableChannel::Session), 0);
        assert!(bridge.size_in_bytes(DurableChannel::Local) > 0);

        bridge.clear(None);
        assert_eq!(bridge.size_in_bytes(DurableChannel::Local), 0);
    }

    #[test]
    fn test_server_side_bridge_is_inert() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.server_side = true;
        let bridge = PersistenceBridge::new(&config);

        let store = CacheStore::new();
        store.set(key("l"), json!(1), CacheTier::LocalDurable);
        bridge.persist_all(&store);
        assert_eq!(bridge.size_in_bytes(DurableChannel::Local), 0);

        let reloaded = CacheStore::new();
        bridge.restore(&reloaded);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_corrupt_blob_restores_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let bridge = PersistenceBridge::new(&config);

        fs::write(&bridge.local_path, b"not a cache blob").unwrap();

        let store = CacheStore::new();
        bridge.restore(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_preserves_entry_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let bridge = PersistenceBridge::new(&config);

        let store = CacheStore::new();
        store.set(
            key("k"),
            json!({"nested": {"value": [1, 2, 3]}}),
            CacheTier::LocalDurable,
        );
        let original = store.peek(&key("k")).unwrap();
        bridge.persist(&store, DurableChannel::Local);

        let reloaded = CacheStore::new();
        bridge.restore(&reloaded);
        let restored = reloaded.peek(&key("k")).unwrap();
        assert_eq!(restored.data, original.data);
        assert_eq!(
            restored.fetched_at.timestamp_millis(),
            original.fetched_at.timestamp_millis()
        );
        assert!(!restored.stale);
    }
}
