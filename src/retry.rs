//! Backoff computation and cancellable retry waits.
//!
//! Delays grow exponentially from a base, are capped at [`MAX_BACKOFF`] and are
//! jittered by ±25% so that many clients failing at the same moment do not
//! retry in lockstep.

use crate::error::{Error, Result, Suspension};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound for a single backoff delay (before jitter).
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Fraction of the delay used as jitter in each direction.
const JITTER: f64 = 0.25;

/// Returns the delay before retry number `attempt` (zero-indexed).
///
/// The delay is `base * 2^attempt`, capped at [`MAX_BACKOFF`], then scaled by a
/// uniform factor in `[0.75, 1.25]`. Because of the jitter, callers should only
/// reason about ranges.
///
/// # Examples
///
/// ```
/// use slshop::retry::backoff_duration;
/// use std::time::Duration;
///
/// let delay = backoff_duration(2, Duration::from_millis(100));
/// assert!(delay >= Duration::from_millis(300) && delay <= Duration::from_millis(500));
/// ```
pub fn backoff_duration(attempt: u32, base: Duration) -> Duration {
    let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let backoff = base.saturating_mul(multiplier).min(MAX_BACKOFF);
    let factor = rand::thread_rng().gen_range((1.0 - JITTER)..=(1.0 + JITTER));
    backoff.mul_f64(factor)
}

/// Sleeps for `delay`, or returns [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn sleep_with_cancel(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(Suspension::Backoff)),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
