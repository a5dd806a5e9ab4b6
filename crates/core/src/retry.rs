//! Bounded retry combinator.
//!
//! Tools and the orchestrator share one retry discipline: a fixed number
//! of attempts (two, everywhere in this system), the last error returned
//! when the budget is exhausted, a later success overriding any earlier
//! failure. No backoff — the failures being retried are reasoning
//! failures, not transport flakes.

use std::future::Future;

use tracing::warn;

/// The uniform attempt budget used at both the tool and orchestrator level.
pub const MAX_ATTEMPTS: usize = 2;

/// Run `op` up to `max_attempts` times, returning the first success or the
/// last error. The closure receives the 1-based attempt number.
///
/// `max_attempts` must be at least 1.
pub async fn retry<T, E, F, Fut>(max_attempts: usize, mut op: F) -> std::result::Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    assert!(max_attempts >= 1, "retry requires at least one attempt");

    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "attempt failed");
                last_err = Some(e);
            }
        }
    }

    // The loop ran at least once, so an error is recorded.
    match last_err {
        Some(e) => Err(e),
        None => unreachable!("retry loop completed without a result"),
    }
}
