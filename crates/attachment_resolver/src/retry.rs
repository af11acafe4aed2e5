use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Maximum retry attempts after an initial fetch attempt.
pub const MAX_RETRIES: u32 = 2;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 250;

fn transient_error_regex() -> Option<&'static Regex> {
    static CACHED: OnceLock<Option<Regex>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r"(?i)rate.?limit|overloaded|service.?unavailable|timed?.?out|connection.?(refused|reset)",
            )
            .ok()
        })
        .as_ref()
}

/// Whether a failed fetch is worth retrying. `status` is `None` when no
/// response was received at all.
pub fn is_retryable_fetch_error(status: Option<u16>, error_text: &str) -> bool {
    if matches!(status, Some(408 | 429 | 500 | 502 | 503 | 504)) {
        return true;
    }

    transient_error_regex().is_some_and(|regex| regex.is_match(error_text))
}

/// Exponential backoff delay for a retry attempt.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{is_retryable_fetch_error, retry_delay};

    #[test]
    fn transient_statuses_and_messages_are_retryable() {
        assert!(is_retryable_fetch_error(Some(429), ""));
        assert!(is_retryable_fetch_error(Some(503), ""));
        assert!(is_retryable_fetch_error(None, "error sending request: connection refused"));
        assert!(is_retryable_fetch_error(Some(400), "Model is overloaded"));
        assert!(!is_retryable_fetch_error(Some(404), "not found"));
        assert!(!is_retryable_fetch_error(Some(403), "forbidden"));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(base, 0), Duration::from_millis(100));
        assert_eq!(retry_delay(base, 1), Duration::from_millis(200));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(800));
    }
}
