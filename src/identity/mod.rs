// Gateway module for identity - follows the Train Station Pattern
// All external access must go through this gateway

mod backoff;
mod manager;

pub use backoff::{is_identity_valid, jittered_ms, retry_delay_ms};
pub use manager::DeviceIdentityManager;
