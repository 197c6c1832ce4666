//! HTTP status classification shared by the providers.

use deckflow_core::error::FlowError;
use std::time::Duration;

/// Map an HTTP error status to a transient or permanent [`FlowError`].
pub fn classify_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> FlowError {
    let message = message.into();
    match status {
        408 => FlowError::timeout(message),
        429 => match retry_after {
            Some(wait) => FlowError::rate_limit_after(message, wait),
            None => FlowError::rate_limit(message),
        },
        401 | 403 => FlowError::authentication(message),
        400 | 404 | 413 | 422 => FlowError::invalid_request(message),
        500..=599 => FlowError::unavailable(message),
        _ => FlowError::provider(format!("HTTP {}: {}", status, message)),
    }
}

/// Parse a `retry-after` header given in seconds.
///
/// HTTP-date values are ignored; the backoff schedule covers those.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}
