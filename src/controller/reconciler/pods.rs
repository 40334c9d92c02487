//! # Pod Retention
//!
//! Pods of a succeeded job are kept for a retention window so their logs stay
//! readable, then deleted. Pods that fail to delete are counted and reported
//! as a warning event on the run; the pass itself carries on.

use crate::constants::JOB_NAME_LABEL;
use crate::controller::events::{actions, reasons, EventPublisher};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::Terraform;
use crate::observability;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ListParams};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, info, warn};

/// Result of checking a job's pods against the retention window
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrunePlan {
    /// Pods past the retention window
    pub expired: Vec<String>,
    /// Pods kept
    pub retained: usize,
    /// Time until the oldest kept pod expires
    pub next_expiry: Option<chrono::Duration>,
}

/// Split pods into expired and retained; pods that never started are kept
pub fn plan_pruning(
    pods: &[(String, Option<DateTime<Utc>>)],
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> PrunePlan {
    let mut plan = PrunePlan::default();
    for (name, started) in pods {
        match started {
            Some(started) if now - *started > retention => plan.expired.push(name.clone()),
            Some(started) => {
                plan.retained += 1;
                let remaining = *started + retention - now;
                plan.next_expiry = Some(plan.next_expiry.map_or(remaining, |n| n.min(remaining)));
            }
            None => plan.retained += 1,
        }
    }
    plan
}

fn start_time(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Delete expired pods of the run's job; `None` when the job has no pods
pub async fn prune_pods(
    reconciler: &Reconciler,
    run: &Terraform,
) -> Result<Option<PrunePlan>, ReconcilerError> {
    let job_name = run.run_name();
    let pods: Api<Pod> = Api::namespaced(reconciler.client.clone(), run.run_namespace());
    let list = pods
        .list(&ListParams::default().labels(&format!("{JOB_NAME_LABEL}={job_name}")))
        .await
        .map_err(ReconcilerError::kube("list runner pods"))?;
    if list.items.is_empty() {
        debug!(job = job_name, "No runner pods found");
        return Ok(None);
    }

    let observed: Vec<(String, Option<DateTime<Utc>>)> = list
        .items
        .iter()
        .map(|pod| {
            (
                pod.metadata.name.clone().unwrap_or_default(),
                pod.status
                    .as_ref()
                    .and_then(|s| s.start_time.as_ref())
                    .and_then(start_time),
            )
        })
        .collect();
    let plan = plan_pruning(&observed, Utc::now(), reconciler.config.pod_retention());

    let mut deleted = 0;
    let mut failed = Vec::new();
    for name in &plan.expired {
        match pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                deleted += 1;
                info!(pod = name.as_str(), "Deleted runner pod past retention");
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {}
            Err(e) => {
                warn!(pod = name.as_str(), error = %e, "Failed to delete runner pod");
                failed.push(format!("{name}: {e}"));
            }
        }
    }
    if deleted > 0 {
        observability::metrics::increment_pods_pruned(deleted);
    }
    report_prune_failures(reconciler.events.as_ref(), &run.object_ref(&()), &failed).await;
    Ok(Some(plan))
}

/// Count failed pod deletions and publish them as one warning event on the run
pub async fn report_prune_failures(
    events: &dyn EventPublisher,
    run_ref: &ObjectReference,
    failed: &[String],
) {
    if failed.is_empty() {
        return;
    }
    observability::metrics::increment_pod_prune_failures(failed.len() as u64);
    events
        .publish(
            run_ref,
            EventType::Warning,
            reasons::POD_PRUNE_FAILED,
            actions::RECONCILE,
            Some(format!(
                "Failed to delete {} expired runner pod(s): {}",
                failed.len(),
                failed.join("; ")
            )),
        )
        .await;
}
