use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_API_HOST, DEFAULT_CLEAR_AFTER_UNUSED_MS, DEFAULT_DEVICE_IDENTITY_PATH,
    DEFAULT_GRAPHQL_PATH, DEFAULT_QUERY_RETRIES, DEFAULT_VALID_DURATION_MS,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// API endpoint configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Device identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// True when running in a stateless server invocation rather than a
    /// long-lived client process. Disables statistics tracking, persistence
    /// and device identity, and enables internal-origin URL rewriting.
    #[serde(default)]
    pub server_side: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            identity: IdentityConfig::default(),
            cache: CacheConfig::default(),
            server_side: false,
        }
    }
}

/// API endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API host used to build endpoint URLs and to classify targets as
    /// internal or external
    pub host: String,
    /// Scheme for built URLs
    pub scheme: String,
    /// Path of the GraphQL endpoint
    pub graphql_path: String,
    /// Internal worker-to-worker origin used to rewrite cross-origin
    /// requests when executing server-side
    pub internal_origin: Option<String>,
    /// Bearer token attached to internal-API requests when credentials
    /// are included
    pub credentials_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            scheme: "https".to_string(),
            graphql_path: DEFAULT_GRAPHQL_PATH.to_string(),
            internal_origin: None,
            credentials_token: None,
        }
    }
}

impl ApiConfig {
    /// Full URL of the GraphQL endpoint
    pub fn graphql_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.graphql_path)
    }
}

/// Device identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Whether device identity tracking is active at all
    pub enabled: bool,
    /// Path of the device identity endpoint
    pub path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: DEFAULT_DEVICE_IDENTITY_PATH.to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default freshness window for cached reads (ms)
    pub valid_duration_ms: u64,
    /// Default retention window before unused entries are swept (ms)
    pub clear_after_unused_ms: u64,
    /// Default retry count for reads
    pub maximum_retries: u32,
    /// Override for the session-scoped persistence directory
    pub session_dir: Option<PathBuf>,
    /// Override for the durable persistence directory
    pub local_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            valid_duration_ms: DEFAULT_VALID_DURATION_MS,
            clear_after_unused_ms: DEFAULT_CLEAR_AFTER_UNUSED_MS,
            maximum_retries: DEFAULT_QUERY_RETRIES,
            session_dir: None,
            local_dir: None,
        }
    }
}

/// Load configuration from multiple sources
pub fn load_config() -> Result<NetworkConfig> {
    let config_dir = get_config_dir()?;
    let global_config = config_dir.join("config.toml");

    let mut figment = Figment::from(Serialized::defaults(NetworkConfig::default()));

    if global_config.exists() {
        figment = figment.merge(Toml::file(&global_config));
    }

    // Environment variables (REQCACHE_ prefix) win over files
    figment = figment.merge(Env::prefixed("REQCACHE_").split("__"));

    figment.extract().context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "reqcache") {
        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        let config_dir = PathBuf::from(home).join(".config").join("reqcache");
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }
}
