//! # Finalization
//!
//! Deletion of a run: submit the `<name>-destroy` job once, wait for it with a
//! bounded poll, then release the finalizer. The finalizer stays whenever
//! anything here fails, so the next pass picks the deletion up again.

use crate::constants::{DESTROY_SUFFIX, TERRAFORM_FINALIZER};
use crate::controller::events::{actions, reasons};
use crate::controller::reconciler::pipeline::build_and_submit;
use crate::controller::reconciler::poll::{poll_until, PollPolicy};
use crate::controller::reconciler::state::{
    deletion_step, destroy_outcome, DeletionStep, DestroyOutcome,
};
use crate::controller::reconciler::status::set_finalizer;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::Terraform;
use crate::observability;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::events::EventType;
use kube::Resource;
use kube_runtime::controller::Action;
use tracing::{info, info_span, warn, Instrument};

pub async fn finalize(reconciler: &Reconciler, run: &Terraform) -> Result<Action, ReconcilerError> {
    let step = deletion_step(
        run.has_finalizer(TERRAFORM_FINALIZER),
        run.spec.config.ignore_delete,
    );
    match step {
        DeletionStep::Done => {
            info!("Run deleted without finalizer, nothing to clean up");
            Ok(Action::await_change())
        }
        DeletionStep::ReleaseFinalizer => {
            info!("ignoreDelete set, releasing finalizer without a destroy job");
            set_finalizer(reconciler, run, false).await?;
            observability::metrics::increment_destroy_runs("skipped");
            Ok(Action::await_change())
        }
        DeletionStep::Destroy => {
            let span = info_span!(
                "controller.finalize",
                resource.name = run.run_name(),
                resource.namespace = run.run_namespace()
            );
            destroy(reconciler, run).instrument(span).await
        }
    }
}

async fn destroy(reconciler: &Reconciler, run: &Terraform) -> Result<Action, ReconcilerError> {
    let destroy_name = format!("{}{DESTROY_SUFFIX}", run.run_name());
    let jobs: Api<Job> = Api::namespaced(reconciler.client.clone(), run.run_namespace());
    let object_ref = run.object_ref(&());

    let existing = jobs
        .get_opt(&destroy_name)
        .await
        .map_err(ReconcilerError::kube("read destroy job"))?;
    if existing.is_none() {
        let ctx = build_and_submit(reconciler, run, true).await?;
        reconciler
            .events
            .publish(
                &object_ref,
                EventType::Normal,
                reasons::DESTROY_STARTED,
                actions::FINALIZE,
                Some(format!("Submitted {} ({})", ctx.name, ctx.action())),
            )
            .await;
    }

    let config = &reconciler.config;
    let policy = PollPolicy {
        interval: config.destroy_poll_interval(),
        max_attempts: config.destroy_max_attempts,
    };
    let threshold = config.destroy_failure_threshold;
    let outcome = poll_until(policy, |_| {
        let jobs = jobs.clone();
        let destroy_name = destroy_name.clone();
        async move {
            let job = jobs.get_opt(&destroy_name).await?;
            Ok::<_, kube::Error>(job.as_ref().and_then(|j| destroy_outcome(j, threshold)))
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalization {
        name: destroy_name.clone(),
        reason: e.to_string(),
    })?;

    observability::metrics::increment_destroy_runs(outcome.as_str());
    let (type_, note) = match outcome {
        DestroyOutcome::Succeeded => (EventType::Normal, format!("{destroy_name} succeeded")),
        DestroyOutcome::GaveUp => {
            warn!(threshold, "Destroy job kept failing, releasing finalizer anyway");
            (
                EventType::Warning,
                format!("{destroy_name} failed more than {threshold} times"),
            )
        }
    };
    reconciler
        .events
        .publish(
            &object_ref,
            type_,
            reasons::DESTROY_FINISHED,
            actions::FINALIZE,
            Some(note),
        )
        .await;

    // the poll may have outlived the observed resource version
    let runs: Api<Terraform> = Api::namespaced(reconciler.client.clone(), run.run_namespace());
    let current = runs
        .get(run.run_name())
        .await
        .map_err(ReconcilerError::kube("re-read run"))?;
    set_finalizer(reconciler, &current, false).await?;
    info!(outcome = outcome.as_str(), "Finalization complete");
    Ok(Action::await_change())
}
