//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Terraform;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per run so one broken stack does not slow down
/// the others. After `MAX_CONSECUTIVE_ERRORS` failed passes the run waits for
/// its next spec change instead of retrying.
pub fn handle_reconciliation_error(
    run: Arc<Terraform>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = run.run_name();
    let namespace = run.run_namespace();
    let error_span = tracing::error_span!(
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {:?}", name, error);
    observability::metrics::increment_reconciliation_errors();

    let key = Reconciler::resource_key(namespace, name);
    let (delay, error_count) = ctx.record_error(&key);

    if ctx.errors_exhausted(&key) {
        warn!(
            error_count,
            "Giving up after repeated failures, waiting for a spec change"
        );
        observability::metrics::increment_requeues("error-exhausted");
        return Action::await_change();
    }

    let next_retry =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX));
    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}, next retry: {})",
        delay.as_secs(),
        error_count,
        next_retry.to_rfc3339()
    );

    observability::metrics::increment_requeues("error-backoff");
    Action::requeue(delay)
}

/// Kind of failure seen on the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch error by its rendered message
///
/// 404 is checked first: a plain-text 404 body surfaces as a serde error that
/// also mentions `WatchFailed`.
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                error = error_string,
                "Watch authentication failed (401), the controller's RBAC may have been revoked"
            );
            error!(
                "Check: kubectl auth can-i list terraforms.tf.tfops.io --as=system:serviceaccount:<namespace>:terraform-controller --all-namespaces"
            );
            warn!(
                "Waiting {}s before retrying watch...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(
                error_type = "410",
                "Watch resource version expired, watch will restart"
            );
            None
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!(
                "API server throttling the watch (429), backing off for {}ms before restart...",
                current
            );
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                error = error_string,
                "Object not found (404), normal after deletions or while the CRD is missing"
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            classify_watch_error("ApiError: Unauthorized (401)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed: too old resource version"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(
            classify_watch_error("WatchFailed: invalid type: integer `404`"),
            WatchErrorKind::NotFound
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            classify_watch_error("Unauthorized lookup: 404 not found"),
            WatchErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_throttling_doubles_backoff_up_to_max() {
        let backoff = Arc::new(AtomicU64::new(1));
        let result =
            handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::ZERO).await;
        assert!(result.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 2);

        handle_watch_stream_error("429", &backoff, 3, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_not_found_keeps_the_stream() {
        let backoff = Arc::new(AtomicU64::new(1));
        let result =
            handle_watch_stream_error("ObjectNotFound", &backoff, 3, Duration::ZERO).await;
        assert_eq!(result, Some(()));
    }
}
