use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::{CacheKey, CacheTier};
use crate::constants::{DEFAULT_CLEAR_AFTER_UNUSED_MS, DEFAULT_VALID_DURATION_MS};
use crate::utils::NetworkError;

/// Async fetch function producing the raw value for a query
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, NetworkError>> + Send + Sync>;

/// Post-fetch projection applied to returned data. Never affects what is
/// cached.
pub type SelectFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Immutable per-call configuration for a read
#[derive(Clone)]
pub struct QueryDescriptor {
    pub key: CacheKey,
    pub cache: CacheTier,
    pub valid_duration_ms: u64,
    pub clear_after_unused_ms: u64,
    /// Polling interval; `None` disables polling
    pub refresh_interval_ms: Option<u64>,
    /// Whether polling continues while the host view is backgrounded
    pub refresh_in_background: bool,
    pub refresh_on_focus: bool,
    pub refresh_on_reconnect: bool,
    pub initial_data: Option<Value>,
    pub placeholder_data: Option<Value>,
    /// Retain the prior result across key changes instead of clearing
    pub keep_previous_data: bool,
    /// Override of the engine-level retry default
    pub maximum_retries: Option<u32>,
    pub enabled: bool,
    pub select: Option<SelectFn>,
    pub metadata: Option<Value>,
}

impl QueryDescriptor {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            cache: CacheTier::Memory,
            valid_duration_ms: DEFAULT_VALID_DURATION_MS,
            clear_after_unused_ms: DEFAULT_CLEAR_AFTER_UNUSED_MS,
            refresh_interval_ms: None,
            refresh_in_background: false,
            refresh_on_focus: false,
            refresh_on_reconnect: false,
            initial_data: None,
            placeholder_data: None,
            keep_previous_data: false,
            maximum_retries: None,
            enabled: true,
            select: None,
            metadata: None,
        }
    }

    pub fn cache(mut self, tier: CacheTier) -> Self {
        self.cache = tier;
        self
    }

    pub fn valid_duration_ms(mut self, ms: u64) -> Self {
        self.valid_duration_ms = ms;
        self
    }

    pub fn clear_after_unused_ms(mut self, ms: u64) -> Self {
        self.clear_after_unused_ms = ms;
        self
    }

    pub fn refresh_interval_ms(mut self, ms: u64) -> Self {
        self.refresh_interval_ms = Some(ms);
        self
    }

    pub fn refresh_in_background(mut self, enabled: bool) -> Self {
        self.refresh_in_background = enabled;
        self
    }

    pub fn refresh_on_focus(mut self, enabled: bool) -> Self {
        self.refresh_on_focus = enabled;
        self
    }

    pub fn refresh_on_reconnect(mut self, enabled: bool) -> Self {
        self.refresh_on_reconnect = enabled;
        self
    }

    pub fn initial_data(mut self, data: Value) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn placeholder_data(mut self, data: Value) -> Self {
        self.placeholder_data = Some(data);
        self
    }

    pub fn keep_previous_data(mut self, keep: bool) -> Self {
        self.keep_previous_data = keep;
        self
    }

    pub fn maximum_retries(mut self, retries: u32) -> Self {
        self.maximum_retries = Some(retries);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn select(mut self, select: SelectFn) -> Self {
        self.select = Some(select);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Freshness window, forced to zero for uncached reads
    pub fn effective_valid_duration_ms(&self) -> u64 {
        if self.cache == CacheTier::Uncached {
            0
        } else {
            self.valid_duration_ms
        }
    }

    /// Retention window, forced to zero for uncached reads
    pub fn effective_retention_ms(&self) -> u64 {
        if self.cache == CacheTier::Uncached {
            0
        } else {
            self.clear_after_unused_ms
        }
    }

    /// Data shown before the first fetch resolves
    pub fn seed_data(&self) -> Option<Value> {
        self.initial_data
            .clone()
            .or_else(|| self.placeholder_data.clone())
    }

    /// The projection the caller sees; caching always stores the raw value
    pub fn project(&self, raw: &Value) -> Value {
        match &self.select {
            Some(select) => select(raw),
            None => raw.clone(),
        }
    }
}

/// Current state of a read: data, error and lifecycle flags
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub data: Option<Value>,
    pub error: Option<NetworkError>,
    pub is_loading: bool,
    /// Background refresh of already-present data, as opposed to the
    /// initial load
    pub is_refreshing: bool,
    pub is_success: bool,
    pub is_error: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueryState {
    /// Pre-fetch state seeded from initial/placeholder data
    pub fn idle(descriptor: &QueryDescriptor) -> Self {
        Self {
            data: descriptor.seed_data(),
            ..Self::default()
        }
    }

    pub fn loading(descriptor: &QueryDescriptor) -> Self {
        Self {
            data: descriptor.seed_data(),
            is_loading: true,
            ..Self::default()
        }
    }

    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            is_success: true,
            updated_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn failure(error: NetworkError, previous_data: Option<Value>) -> Self {
        Self {
            data: previous_data,
            error: Some(error),
            is_error: true,
            updated_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Transition into a background refresh, keeping current data
    pub fn refreshing(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_refreshing: true,
            is_success: self.is_success,
            updated_at: self.updated_at,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uncached_forces_zero_windows() {
        let descriptor = QueryDescriptor::new(CacheKey::new([json!("k")]))
            .cache(CacheTier::Uncached)
            .valid_duration_ms(60_000)
            .clear_after_unused_ms(60_000);
        assert_eq!(descriptor.effective_valid_duration_ms(), 0);
        assert_eq!(descriptor.effective_retention_ms(), 0);

        let cached = descriptor.clone().cache(CacheTier::Memory);
        assert_eq!(cached.effective_valid_duration_ms(), 60_000);
    }

    #[test]
    fn test_seed_data_prefers_initial() {
        let descriptor = QueryDescriptor::new(CacheKey::new([json!("k")]))
            .initial_data(json!("initial"))
            .placeholder_data(json!("placeholder"));
        assert_eq!(descriptor.seed_data(), Some(json!("initial")));

        let placeholder_only =
            QueryDescriptor::new(CacheKey::new([json!("k")])).placeholder_data(json!("p"));
        assert_eq!(placeholder_only.seed_data(), Some(json!("p")));
    }

    #[test]
    fn test_select_projects_without_touching_raw() {
        let descriptor = QueryDescriptor::new(CacheKey::new([json!("k")]))
            .select(Arc::new(|raw| raw["items"].clone()));
        let raw = json!({"items": [1, 2], "cursor": "abc"});
        assert_eq!(descriptor.project(&raw), json!([1, 2]));
        // Raw value untouched for caching
        assert_eq!(raw["cursor"], "abc");
    }

    #[test]
    fn test_state_transitions() {
        let descriptor =
            QueryDescriptor::new(CacheKey::new([json!("k")])).placeholder_data(json!("p"));
        let loading = QueryState::loading(&descriptor);
        assert!(loading.is_loading);
        assert_eq!(loading.data, Some(json!("p")));

        let success = QueryState::success(json!(42));
        assert!(success.is_success && !success.is_loading);

        let refreshing = success.refreshing();
        assert!(refreshing.is_refreshing);
        assert_eq!(refreshing.data, Some(json!(42)));
    }
}
