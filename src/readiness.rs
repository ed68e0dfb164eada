//! Bounded readiness polling.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Call `probe` until it reports ready, at most `max_attempts` times with
/// `interval` between attempts. Returns the attempt that succeeded.
///
/// Exhausting the attempts yields a retryable `ReadinessTimeout` naming `target`.
pub async fn poll_until<F, Fut>(
    target: &str,
    mut probe: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=max_attempts {
        if probe().await {
            log::debug!("{} ready after {} attempt(s)", target, attempt);
            return Ok(attempt);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(AppError::readiness_timeout(target, max_attempts))
}
