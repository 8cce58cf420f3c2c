use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backoff::{is_identity_valid, jittered_ms, retry_delay_ms};
use crate::app::NetworkConfig;
use crate::constants::IDENTITY_REQUEST_TIMEOUT_SECS;

const STATE_FILE: &str = "device-identity";

/// Acquires and persists the long-lived device identity required before
/// any authenticated request.
///
/// Acquisition is serialized process-wide: concurrent `ensure()` calls
/// attach to the attempt already in flight. Failures are absorbed by an
/// unbounded retry loop; there is no permanent failure state by design,
/// so the system recovers on its own after arbitrarily long outages.
pub struct DeviceIdentityManager {
    config: Arc<NetworkConfig>,
    // Deliberately bare client: identity acquisition must not depend on
    // the request engine, which itself waits on identity
    client: reqwest::Client,
    state_path: PathBuf,
    checked: AtomicBool,
    in_flight: tokio::sync::Mutex<()>,
}

impl DeviceIdentityManager {
    pub fn new(config: Arc<NetworkConfig>) -> Self {
        let state_dir = config
            .cache
            .local_dir
            .clone()
            .unwrap_or_else(default_state_dir);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(IDENTITY_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            config,
            client,
            state_path: state_dir.join(STATE_FILE),
            checked: AtomicBool::new(false),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether identity acquisition applies in this execution context
    pub fn is_required(&self) -> bool {
        self.config.identity.enabled && !self.config.server_side
    }

    /// Guarantee a valid device identity exists before returning, or that
    /// this context does not need one. Never fails.
    pub async fn ensure(&self) {
        if !self.is_required() {
            return;
        }
        // Confirmed earlier in this process: skip the storage read
        if self.checked.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.in_flight.lock().await;
        // A concurrent caller may have finished while we waited
        if self.checked.load(Ordering::Acquire) {
            return;
        }

        if let Some(last_updated_at) = self.read_state() {
            if is_identity_valid(last_updated_at, Utc::now()) {
                debug!("Device identity still valid (updated {last_updated_at})");
                self.checked.store(true, Ordering::Release);
                return;
            }
        }

        self.acquire_with_retry().await;
    }

    /// Forget the confirmed flag so the next `ensure()` re-validates
    /// from storage
    pub fn reset(&self) {
        self.checked.store(false, Ordering::Release);
    }

    /// Infinite acquisition loop. An explicit loop rather than recursion,
    /// so the stack stays flat across arbitrarily many retries.
    async fn acquire_with_retry(&self) {
        let mut attempt: u32 = 0;
        loop {
            match self.acquire_once().await {
                Ok(()) => {
                    self.write_state(Utc::now());
                    self.checked.store(true, Ordering::Release);
                    info!("Device identity acquired after {} attempt(s)", attempt + 1);
                    return;
                }
                Err(e) => {
                    let delay = jittered_ms(retry_delay_ms(attempt));
                    warn!(
                        "Device identity acquisition failed (attempt {}): {}; retrying in {} ms",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// One acquisition request. Success is judged solely by the HTTP
    /// status; the response body is not inspected.
    async fn acquire_once(&self) -> Result<(), String> {
        let url = format!(
            "{}://{}{}",
            self.config.api.scheme, self.config.api.host, self.config.identity.path
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({"query": "{ deviceId }"}))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("identity endpoint returned {}", response.status()))
        }
    }

    fn read_state(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(&self.state_path).ok()?;
        let millis: i64 = raw.trim().parse().ok()?;
        DateTime::<Utc>::from_timestamp_millis(millis)
    }

    fn write_state(&self, last_updated_at: DateTime<Utc>) {
        if let Some(parent) = self.state_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create identity state directory: {}", e);
                return;
            }
        }
        if let Err(e) = fs::write(
            &self.state_path,
            last_updated_at.timestamp_millis().to_string(),
        ) {
            warn!(
                "Failed to persist device identity state to {}: {}",
                self.state_path.display(),
                e
            );
        }
    }
}

fn default_state_dir() -> PathBuf {
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
    use chrono::Duration as ChronoDuration;

    fn manager_with_dir(dir: PathBuf) -> DeviceIdentityManager {
        let mut config = NetworkConfig::default();
        config.cache.local_dir = Some(dir);
        DeviceIdentityManager::new(Arc::new(config))
    }

    #[tokio::test]
    async fn test_valid_stored_identity_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dir(tmp.path().to_path_buf());
        manager.write_state(Utc::now() - ChronoDuration::days(1));

        // No server is running; a network attempt would spin forever
        manager.ensure().await;
        assert!(manager.checked.load(Ordering::Acquire));

        // Second call short-circuits on the process-lifetime flag
        manager.ensure().await;
    }

    #[tokio::test]
    async fn test_disabled_identity_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::default();
        config.cache.local_dir = Some(tmp.path().to_path_buf());
        config.identity.enabled = false;
        let manager = DeviceIdentityManager::new(Arc::new(config));

        manager.ensure().await;
        // Never confirmed, never attempted: identity simply does not apply
        assert!(!manager.checked.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_server_side_skips_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::default();
        config.cache.local_dir = Some(tmp.path().to_path_buf());
        config.server_side = true;
        let manager = DeviceIdentityManager::new(Arc::new(config));
        assert!(!manager.is_required());
        manager.ensure().await;
    }

    #[test]
    fn test_state_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dir(tmp.path().to_path_buf());
        assert_eq!(manager.read_state(), None);

        let stamp = Utc::now();
        manager.write_state(stamp);
        let restored = manager.read_state().unwrap();
        assert_eq!(restored.timestamp_millis(), stamp.timestamp_millis());
    }

    #[test]
    fn test_reset_forces_revalidation() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dir(tmp.path().to_path_buf());
        manager.checked.store(true, Ordering::Release);
        manager.reset();
        assert!(!manager.checked.load(Ordering::Acquire));
    }

    #[test]
    fn test_corrupt_state_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dir(tmp.path().to_path_buf());
        fs::write(&manager.state_path, "not a timestamp").unwrap();
        assert_eq!(manager.read_state(), None);
    }
}
