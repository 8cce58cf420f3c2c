// Gateway module for app - follows the Train Station Pattern
// All external access must go through this gateway

mod config;

pub use config::{
    get_config_dir, load_config, ApiConfig, CacheConfig, IdentityConfig, NetworkConfig,
};
