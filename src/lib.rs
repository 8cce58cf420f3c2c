pub mod app;
pub mod cache;
pub mod constants;
pub mod graphql;
pub mod identity;
pub mod service;
pub mod stats;
pub mod utils;

pub use app::{load_config, NetworkConfig};
pub use cache::{CacheKey, CacheTier, DurableChannel};
pub use graphql::{Operation, OperationRegistry};
pub use service::{
    Mutation, MutationDescriptor, NetworkService, QueryDescriptor, QueryState, QueryWatcher,
    RefetchScope, RequestOptions,
};
pub use stats::StatisticsSnapshot;
pub use utils::NetworkError;
