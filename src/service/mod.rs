// Gateway module for service - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod mutation;
mod network;
mod query;
mod retry;
mod transport;

// Public re-exports - the ONLY way to access service functionality
pub use mutation::{
    DeriveKeysFn, ErrorCallback, InvalidateKeys, Mutation, MutationDescriptor, MutationFetcher,
    MutationState, SuccessCallback,
};
pub use network::{NetworkService, QueryWatcher, RefetchScope};
pub use query::{Fetcher, QueryDescriptor, QueryState, SelectFn};
pub use retry::{execute_with_retry, RetryPolicy};
pub use transport::{registrable_domain, HttpTransport, RequestOptions, TransportResponse};
