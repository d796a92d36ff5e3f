//! `Retry-After` handling for throttled (429) and unavailable (503) responses.

use http::HeaderMap;
use std::time::{Duration, SystemTime};

/// Delay reported on a final 429 response that carried no usable `Retry-After`.
pub const RATE_LIMIT_DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Parses a `Retry-After` header value.
///
/// Accepts delay-seconds (integer or fractional, e.g. `"120"` or `"2.5"`) and
/// HTTP-dates (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Empty, malformed, negative and
/// past values all yield [`Duration::ZERO`]; the result is never negative.
///
/// # Examples
///
/// ```
/// use slshop::rate_limit::parse_retry_after;
/// use std::time::Duration;
///
/// assert_eq!(parse_retry_after("120"), Duration::from_secs(120));
/// assert_eq!(parse_retry_after("2.5"), Duration::from_millis(2500));
/// assert_eq!(parse_retry_after("soon"), Duration::ZERO);
/// assert_eq!(parse_retry_after(""), Duration::ZERO);
/// ```
pub fn parse_retry_after(header: &str) -> Duration {
    let header = header.trim();
    if header.is_empty() {
        return Duration::ZERO;
    }

    if let Ok(seconds) = header.parse::<f64>() {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        return Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
    }

    match httpdate::parse_http_date(header) {
        Ok(at) => at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
        Err(_) => Duration::ZERO,
    }
}

/// Returns the `Retry-After` delay from response headers, if present and positive.
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    Some(parse_retry_after(value)).filter(|delay| !delay.is_zero())
}
