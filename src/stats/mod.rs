// Gateway module for stats - follows the Train Station Pattern
// All external access must go through this gateway

mod collector;
mod types;

pub use collector::{RequestTracker, StatisticsCollector};
pub use types::StatisticsSnapshot;
