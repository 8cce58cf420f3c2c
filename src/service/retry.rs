use std::future::Future;
use tracing::debug;

use crate::constants::{DEFAULT_MUTATION_RETRIES, DEFAULT_QUERY_RETRIES};
use crate::utils::NetworkError;

/// Retry policy for engine-issued requests.
///
/// Errors carrying a 4xx status (transport-level or GraphQL-extension)
/// are deterministic client errors and are never retried. Everything else
/// is plausibly transient and retried up to the configured count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub maximum_retries: u32,
}

impl RetryPolicy {
    pub fn queries() -> Self {
        Self {
            maximum_retries: DEFAULT_QUERY_RETRIES,
        }
    }

    pub fn mutations() -> Self {
        Self {
            maximum_retries: DEFAULT_MUTATION_RETRIES,
        }
    }

    pub fn with_retries(maximum_retries: u32) -> Self {
        Self { maximum_retries }
    }

    /// Whether to retry after the given number of failures so far
    pub fn should_retry(&self, error: &NetworkError, failures: u32) -> bool {
        if error.is_client_error() {
            return false;
        }
        failures <= self.maximum_retries
    }
}

/// Run an operation under a retry policy, returning the final outcome
pub async fn execute_with_retry<F, Fut, T>(
    policy: RetryPolicy,
    operation: F,
) -> Result<T, NetworkError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let mut failures: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                failures += 1;
                if !policy.should_retry(&error, failures) {
                    return Err(error);
                }
                debug!("Retrying after failure {}: {}", failures, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport_error(status: u16) -> NetworkError {
        NetworkError::Transport {
            status,
            message: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(RetryPolicy::queries(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transport_error(404)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_graphql_extension_status_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(RetryPolicy::queries(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(NetworkError::GraphQl {
                    status: Some(422),
                    errors: serde_json::json!([{"message": "invalid"}]),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_once_by_default() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(RetryPolicy::queries(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transport_error(503)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mutations_do_not_retry_by_default() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(RetryPolicy::mutations(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transport_error(500)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_retry() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(RetryPolicy::with_retries(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(NetworkError::Http("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
