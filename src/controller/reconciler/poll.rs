//! # Bounded Polling
//!
//! Fixed-interval polling with a hard attempt cap. Check errors count as
//! transient and use up an attempt. Dropping the returned future cancels the
//! wait.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("gave up after {attempts} attempts")]
pub struct PollExhausted {
    pub attempts: u32,
}

/// Call `check` until it yields a value, sleeping `interval` between calls
///
/// `check` receives the 1-based attempt number. `Ok(None)` means not done yet.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(attempt, "Poll target not ready yet"),
            Err(e) => warn!(attempt, error = %e, "Poll check failed, retrying"),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(PollExhausted {
        attempts: policy.max_attempts,
    })
}
