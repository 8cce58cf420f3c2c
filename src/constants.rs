/// Constants module to avoid magic numbers in the codebase

// Network Configuration
pub const DEFAULT_API_HOST: &str = "api.example.com";
pub const DEFAULT_GRAPHQL_PATH: &str = "/graphql";
pub const DEFAULT_DEVICE_IDENTITY_PATH: &str = "/device-identity";
pub const GRAPHQL_ACCEPT_HEADER: &str = "application/graphql-response+json";

// Timeouts
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const IDENTITY_REQUEST_TIMEOUT_SECS: u64 = 10;

// Device identity acquisition backoff
pub const IDENTITY_BACKOFF_BASE_MS: u64 = 1_000;
pub const IDENTITY_BACKOFF_CAP_MS: u64 = 60_000;
// After this many attempts the delay stops doubling and stays at the cap
pub const IDENTITY_BACKOFF_STEADY_AFTER: u32 = 6;
pub const IDENTITY_BACKOFF_JITTER_RATIO: f64 = 0.1;

// Device identity validity window: 6 months (6 x 30 days)
pub const IDENTITY_VALIDITY_MS: i64 = 6 * 30 * 24 * 60 * 60 * 1_000;

// Cache defaults
pub const DEFAULT_VALID_DURATION_MS: u64 = 60_000;
pub const DEFAULT_CLEAR_AFTER_UNUSED_MS: u64 = 5 * 60_000;
pub const DEFAULT_QUERY_RETRIES: u32 = 1;
pub const DEFAULT_MUTATION_RETRIES: u32 = 0;

// Statistics
pub const LATENCY_SAMPLE_WINDOW: usize = 100;

// Persistence
pub const SESSION_CACHE_FILE: &str = "session-cache.bin";
pub const LOCAL_CACHE_FILE: &str = "local-cache.bin";
