use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};

use super::network::NetworkService;
use super::retry::{execute_with_retry, RetryPolicy};
use crate::cache::CacheKey;
use crate::constants::DEFAULT_MUTATION_RETRIES;
use crate::utils::NetworkError;

/// Async mutating function, called with the execution's variables
pub type MutationFetcher =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, NetworkError>> + Send + Sync>;

/// Called with (data, variables) after a successful execution
pub type SuccessCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&NetworkError) + Send + Sync>;
pub type DeriveKeysFn = Arc<dyn Fn(&Value) -> Vec<CacheKey> + Send + Sync>;

/// Cache keys to invalidate when a write succeeds: a fixed list, or a
/// function from the call's variables to a list
#[derive(Clone)]
pub enum InvalidateKeys {
    List(Vec<CacheKey>),
    Derive(DeriveKeysFn),
}

impl InvalidateKeys {
    pub fn resolve(&self, variables: &Value) -> Vec<CacheKey> {
        match self {
            InvalidateKeys::List(keys) => keys.clone(),
            InvalidateKeys::Derive(derive) => derive(variables),
        }
    }
}

/// Immutable per-call configuration for a write
#[derive(Clone, Default)]
pub struct MutationDescriptor {
    pub invalidate_on_success: Option<InvalidateKeys>,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Writes do not retry unless asked to
    pub maximum_retries: Option<u32>,
    pub metadata: Option<Value>,
}

impl MutationDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate_on_success(mut self, keys: InvalidateKeys) -> Self {
        self.invalidate_on_success = Some(keys);
        self
    }

    pub fn on_success(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn maximum_retries(mut self, retries: u32) -> Self {
        self.maximum_retries = Some(retries);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Observable state of a mutation handle
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    pub is_pending: bool,
    pub is_success: bool,
    pub is_error: bool,
    pub error: Option<NetworkError>,
    pub last_variables: Option<Value>,
}

/// Write handle produced by `NetworkService::mutation`.
///
/// Concurrent `execute` calls run independently; there is no dedup for
/// writes, and results are never written to any cache tier. The handle
/// holds a weak service reference, so it may outlive the service;
/// executing after the service is gone fails as a cancellation.
pub struct Mutation {
    service: Weak<NetworkService>,
    descriptor: MutationDescriptor,
    fetcher: MutationFetcher,
    state: Mutex<MutationState>,
}

impl Mutation {
    pub(crate) fn new(
        service: Weak<NetworkService>,
        descriptor: MutationDescriptor,
        fetcher: MutationFetcher,
    ) -> Self {
        Self {
            service,
            descriptor,
            fetcher,
            state: Mutex::new(MutationState::default()),
        }
    }

    /// Run the write. On success every key resolved from
    /// `invalidate_on_success` is invalidated strictly before the
    /// caller-supplied `on_success` runs, so dependent reads never observe
    /// the pre-invalidation value from inside the callback.
    pub async fn execute(&self, variables: Value) -> Result<Value, NetworkError> {
        {
            let mut state = self.state.lock();
            state.is_pending = true;
            state.is_success = false;
            state.is_error = false;
            state.error = None;
            state.last_variables = Some(variables.clone());
        }

        let Some(service) = self.service.upgrade() else {
            let mut state = self.state.lock();
            state.is_pending = false;
            state.is_error = true;
            state.error = Some(NetworkError::Cancelled);
            return Err(NetworkError::Cancelled);
        };

        service.identity().ensure().await;

        let policy = RetryPolicy::with_retries(
            self.descriptor
                .maximum_retries
                .unwrap_or(DEFAULT_MUTATION_RETRIES),
        );
        let fetcher = Arc::clone(&self.fetcher);
        let call_variables = variables.clone();
        let result =
            execute_with_retry(policy, move || fetcher(call_variables.clone())).await;

        match result {
            Ok(data) => {
                if let Some(invalidate) = &self.descriptor.invalidate_on_success {
                    for key in invalidate.resolve(&variables) {
                        service.invalidate(&key);
                    }
                }
                if let Some(on_success) = &self.descriptor.on_success {
                    on_success(&data, &variables);
                }
                let mut state = self.state.lock();
                state.is_pending = false;
                state.is_success = true;
                Ok(data)
            }
            Err(error) => {
                if let Some(on_error) = &self.descriptor.on_error {
                    on_error(&error);
                }
                let mut state = self.state.lock();
                state.is_pending = false;
                state.is_error = true;
                state.error = Some(error.clone());
                Err(error)
            }
        }
    }

    pub fn state(&self) -> MutationState {
        self.state.lock().clone()
    }

    /// Mutations have no true cancellation: the in-flight call is
    /// unaffected; only the cancellation statistic is recorded.
    pub fn cancel(&self) {
        if let Some(service) = self.service.upgrade() {
            service.statistics().track_cancellation();
        }
    }
}
