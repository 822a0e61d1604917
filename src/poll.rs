//! Bounded wall-clock polling used by the bring-up stages

use std::time::Duration;

/// Cadence at which bring-up stages check their connected flag
pub const BRINGUP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Check `condition` every `cadence` until it holds or `timeout` elapses
///
/// Checks `timeout / cadence` times with a sleep after each miss, then once more
/// at expiry. There is no cancellation: the caller acts on the result.
pub async fn poll_until<F>(timeout: Duration, cadence: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let attempts = if cadence.is_zero() {
        0
    } else {
        timeout.as_millis() / cadence.as_millis()
    };

    for _ in 0..attempts {
        if condition() {
            return true;
        }
        tokio::time::sleep(cadence).await;
    }

    condition()
}
