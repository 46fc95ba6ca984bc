//! Retry policy for model requests.

use std::time::Duration;

/// Transient HTTP statuses worth another attempt.
pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 429 || status >= 500
}

/// Delay before retry number `attempt + 1`: `base_ms * 2^attempt`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.min(6);
    Duration::from_millis(base_ms.saturating_mul(1_u64 << shift))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_transient_statuses() {
        for status in [408, 409, 429, 500, 502, 503] {
            assert!(should_retry_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!should_retry_status(status), "{status}");
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1000, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1000, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(1000, 40), Duration::from_secs(64));
    }
}
