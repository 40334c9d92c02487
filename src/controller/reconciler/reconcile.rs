//! # Reconciliation Logic
//!
//! One pass over a `Terraform` run. Errors are reported as a warning event on
//! the run and returned to the error policy, which owns the retry backoff.

use crate::constants::TERRAFORM_FINALIZER;
use crate::controller::events::{actions, reasons};
use crate::controller::reconciler::finalize::finalize;
use crate::controller::reconciler::pipeline::build_and_submit;
use crate::controller::reconciler::pods::prune_pods;
use crate::controller::reconciler::state::{decide, job_generation, Decision, JobState};
use crate::controller::reconciler::status::{read_status_config_map, set_finalizer, update_phase};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{RunPhase, Terraform};
use crate::observability;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams};
use kube::runtime::events::EventType;
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Main reconciliation function
pub async fn reconcile(
    run: Arc<Terraform>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = run.run_name().to_string();
    let namespace = run.run_namespace().to_string();
    let span = info_span!(
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        generation = run.generation()
    );

    async move {
        observability::metrics::increment_reconciliations();
        let result = reconcile_run(&run, &reconciler).await;
        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        let key = Reconciler::resource_key(&namespace, &name);
        match &result {
            Ok(action) => {
                if reconciler.reset_backoff(&key) {
                    info!("Run recovered, backoff reset");
                }
                debug!(?action, duration = start.elapsed().as_secs_f64(), "Reconciliation complete");
            }
            Err(e) => {
                reconciler
                    .events
                    .publish(
                        &run.object_ref(&()),
                        EventType::Warning,
                        reasons::PROCESSING_ERROR,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn reconcile_run(
    cached: &Terraform,
    reconciler: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let runs: Api<Terraform> = Api::namespaced(reconciler.client.clone(), cached.run_namespace());
    // fresh copy so status and finalizer writes carry a current resource version
    let Some(run) = runs
        .get_opt(cached.run_name())
        .await
        .map_err(ReconcilerError::kube("read run"))?
    else {
        debug!("Run no longer exists");
        return Ok(Action::await_change());
    };

    if run.is_marked_for_deletion() {
        return finalize(reconciler, &run).await;
    }

    let run = if run.has_finalizer(TERRAFORM_FINALIZER) {
        run
    } else {
        set_finalizer(reconciler, &run, true).await?
    };

    let jobs: Api<Job> = Api::namespaced(reconciler.client.clone(), run.run_namespace());
    let job = jobs
        .get_opt(run.run_name())
        .await
        .map_err(ReconcilerError::kube("read job"))?;
    let state = JobState::from_job(job.as_ref());
    let decision = decide(
        state,
        job.as_ref().and_then(job_generation),
        run.status.as_ref(),
        run.generation(),
    );
    debug!(state = state.as_str(), ?decision, "Observed job");

    let config = &reconciler.config;
    match decision {
        Decision::Build => {
            let ctx = build_and_submit(reconciler, &run, false).await?;
            reconciler
                .events
                .publish(
                    &run.object_ref(&()),
                    EventType::Normal,
                    reasons::JOB_SUBMITTED,
                    actions::SUBMIT,
                    Some(format!("Submitted {} ({})", ctx.name, ctx.action())),
                )
                .await;
            Ok(requeue(Duration::ZERO, "submitted"))
        }
        Decision::Running => {
            update_phase(reconciler, &run, RunPhase::Running, None).await?;
            Ok(requeue(config.running_requeue_duration(), "running"))
        }
        Decision::WaitForTermination => {
            Ok(requeue(config.terminating_requeue_duration(), "terminating"))
        }
        Decision::Restart => {
            match jobs.delete(run.run_name(), &DeleteParams::background()).await {
                Ok(_) => {}
                Err(kube::Error::Api(api_err)) if api_err.code == 404 => {}
                Err(e) => return Err(ReconcilerError::kube("delete job")(e)),
            }
            observability::metrics::increment_job_restarts();
            info!(generation = run.generation(), "Spec changed after a finished job, restarting");
            reconciler
                .events
                .publish(
                    &run.object_ref(&()),
                    EventType::Normal,
                    reasons::JOB_RESTARTED,
                    actions::SUBMIT,
                    Some(format!("Generation {} differs from the last run", run.generation())),
                )
                .await;
            Ok(requeue(Duration::ZERO, "restarted"))
        }
        Decision::Failed => {
            warn!("Job failed, waiting for a spec change");
            reconciler
                .events
                .publish(
                    &run.object_ref(&()),
                    EventType::Warning,
                    reasons::JOB_FAILED,
                    actions::RECONCILE,
                    Some(format!("Job {} failed", run.run_name())),
                )
                .await;
            Ok(Action::await_change())
        }
        Decision::Complete => {
            update_phase(reconciler, &run, RunPhase::Stopped, Some(run.generation())).await?;
            let data = read_status_config_map(reconciler, &run).await?;
            info!(keys = ?data.keys().collect::<Vec<_>>(), "Read run status ConfigMap");

            let stopped = config.stopped_requeue_duration();
            let delay = match prune_pods(reconciler, &run).await? {
                None => stopped,
                Some(plan) => plan
                    .next_expiry
                    .and_then(|d| d.to_std().ok())
                    .map_or(stopped, |d| d.max(stopped)),
            };
            Ok(requeue(delay, "stopped"))
        }
    }
}

fn requeue(delay: Duration, reason: &str) -> Action {
    observability::metrics::increment_requeues(reason);
    Action::requeue(delay)
}
