//! # Run State
//!
//! Pure decisions of the reconciler: what the observed job means and what the
//! pass should do about it. Nothing here talks to the API server.

use crate::constants::GENERATION_ANNOTATION;
use crate::crd::{RunPhase, TerraformStatus};
use k8s_openapi::api::batch::v1::Job;

/// Observed state of the run's job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NoJob,
    /// Pods running or not yet scheduled
    Active,
    Succeeded,
    Failed,
    /// Deleted but not yet gone
    Terminating,
}

impl JobState {
    pub fn from_job(job: Option<&Job>) -> Self {
        let Some(job) = job else {
            return JobState::NoJob;
        };
        if job.metadata.deletion_timestamp.is_some() {
            return JobState::Terminating;
        }
        let status = job.status.as_ref();
        let active = status.and_then(|s| s.active).unwrap_or(0);
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);

        if active > 0 {
            JobState::Active
        } else if succeeded > 0 {
            JobState::Succeeded
        } else if failed > 0 {
            JobState::Failed
        } else {
            JobState::Active
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::NoJob => "no-job",
            JobState::Active => "active",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Terminating => "terminating",
        }
    }
}

/// Generation the job was built from, from its annotation
pub fn job_generation(job: &Job) -> Option<i64> {
    job.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(GENERATION_ANNOTATION))
        .and_then(|g| g.parse().ok())
}

/// What a pass does for a live run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the build pipeline and submit a job
    Build,
    /// Mark `running` and check back later
    Running,
    /// Delete the job so the next pass rebuilds it
    Restart,
    /// Mark `stopped`, read the run's status ConfigMap and prune old pods
    Complete,
    /// Job failed for the current generation; wait for a spec change
    Failed,
    /// Wait for a deleted job to disappear
    WaitForTermination,
}

/// Decide the next step from the job state and the recorded status
///
/// `job_generation` is the generation annotation of the existing job. A job
/// already built from the current generation is never restarted, even when
/// it finished before the `running` phase was recorded.
pub fn decide(
    state: JobState,
    job_generation: Option<i64>,
    status: Option<&TerraformStatus>,
    generation: i64,
) -> Decision {
    match state {
        JobState::NoJob => Decision::Build,
        JobState::Active => Decision::Running,
        JobState::Terminating => Decision::WaitForTermination,
        JobState::Succeeded => {
            let stopped = status.and_then(|s| s.phase) == Some(RunPhase::Stopped);
            let recorded = status.and_then(|s| s.last_observed_generation);
            if stopped && recorded != Some(generation) && job_generation != Some(generation) {
                Decision::Restart
            } else {
                Decision::Complete
            }
        }
        JobState::Failed => {
            if job_generation.is_some_and(|g| g != generation) {
                Decision::Restart
            } else {
                Decision::Failed
            }
        }
    }
}

/// What a pass does for a run marked for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStep {
    /// Finalizer already gone; nothing to do
    Done,
    /// Release the finalizer without running a destroy job
    ReleaseFinalizer,
    /// Run the destroy job, wait for it, then release the finalizer
    Destroy,
}

pub fn deletion_step(has_finalizer: bool, ignore_delete: bool) -> DeletionStep {
    match (has_finalizer, ignore_delete) {
        (false, _) => DeletionStep::Done,
        (true, true) => DeletionStep::ReleaseFinalizer,
        (true, false) => DeletionStep::Destroy,
    }
}

/// How a destroy job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Succeeded,
    /// Failed more often than the threshold allows
    GaveUp,
}

impl DestroyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestroyOutcome::Succeeded => "succeeded",
            DestroyOutcome::GaveUp => "gave-up",
        }
    }
}

/// Final outcome of a destroy job, `None` while it is still going
pub fn destroy_outcome(job: &Job, failure_threshold: i32) -> Option<DestroyOutcome> {
    let status = job.status.as_ref()?;
    if status.succeeded.unwrap_or(0) > 0 {
        Some(DestroyOutcome::Succeeded)
    } else if status.failed.unwrap_or(0) > failure_threshold {
        Some(DestroyOutcome::GaveUp)
    } else {
        None
    }
}
