// Gateway module for cache - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod persist;
mod store;
mod types;

// Public re-exports - the ONLY way to access cache functionality
pub use persist::{DurableChannel, PersistenceBridge};
pub use store::CacheStore;
pub use types::{CacheEntry, CacheKey, CacheTier};
