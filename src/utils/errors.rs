use thiserror::Error;

/// Main error type for reqcache
///
/// Clone is required because deduplicated in-flight fetches fan the same
/// outcome out to every waiting subscriber, so payloads are owned strings
/// and JSON values rather than source errors.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Transport error: HTTP {status}: {message}")]
    Transport { status: u16, message: String },

    #[error("GraphQL error: {errors}")]
    GraphQl {
        status: Option<u16>,
        errors: serde_json::Value,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(
        "Unknown GraphQL operation '{0}': not found in any generated source. \
         Regenerate the operation artifacts and try again."
    )]
    UnknownOperation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl NetworkError {
    /// HTTP-like status carried by the error, used by the retry policy.
    ///
    /// Transport errors always carry one; GraphQL errors carry the status
    /// from their error extensions when the server provided it.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Transport { status, .. } => Some(*status),
            NetworkError::GraphQl { status, .. } => *status,
            _ => None,
        }
    }

    /// True when the status is a deterministic client error (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(s) if (400..=499).contains(&s))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Serialization(err.to_string())
    }
}
