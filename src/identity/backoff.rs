use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::constants::{
    IDENTITY_BACKOFF_BASE_MS, IDENTITY_BACKOFF_CAP_MS, IDENTITY_BACKOFF_JITTER_RATIO,
    IDENTITY_BACKOFF_STEADY_AFTER, IDENTITY_VALIDITY_MS,
};

/// Pre-jitter delay after the given failed attempt (0-based).
///
/// Doubles from 1 s, capped at 60 s; from the sixth failure onward every
/// retry waits the fixed 60 s steady state. There is no attempt limit.
pub fn retry_delay_ms(attempt: u32) -> u64 {
    if attempt >= IDENTITY_BACKOFF_STEADY_AFTER {
        return IDENTITY_BACKOFF_CAP_MS;
    }
    IDENTITY_BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt)
        .min(IDENTITY_BACKOFF_CAP_MS)
}

/// Perturb a delay by ±10% to avoid synchronized retry storms
pub fn jittered_ms(delay_ms: u64) -> u64 {
    let factor = rand::thread_rng()
        .gen_range(1.0 - IDENTITY_BACKOFF_JITTER_RATIO..=1.0 + IDENTITY_BACKOFF_JITTER_RATIO);
    (delay_ms as f64 * factor).round() as u64
}

/// Whether a stored identity timestamp is still within the validity
/// window. An identity at exactly the window edge has expired.
pub fn is_identity_valid(last_updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_updated_at < Duration::milliseconds(IDENTITY_VALIDITY_MS)
}
