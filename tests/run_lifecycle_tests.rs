//! # Run Lifecycle Tests
//!
//! Walks a `demo` run through create, update, failure and deletion using the
//! pure decision functions and the object builders, without a cluster.

mod common;

use common::demo_run;
use k8s_openapi::api::batch::v1::Job;
use std::time::Duration;
use tfops_controller::config::ControllerConfig;
use tfops_controller::controller::orchestrator::{GeneratedObjectSet, ModuleSource, RunContext};
use tfops_controller::controller::reconciler::poll::{poll_until, PollExhausted, PollPolicy};
use tfops_controller::controller::reconciler::{
    decide, deletion_step, destroy_outcome, job_generation, Decision, DeletionStep,
    DestroyOutcome, JobState,
};
use tfops_controller::crd::{RunPhase, TerraformStatus};

const APPLY_EVERYWHERE: &str = "    applyOnCreate: true\n    applyOnUpdate: true";

fn job_json(generation: i64, status: serde_json::Value) -> Job {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": "demo",
            "namespace": "default",
            "annotations": {"tf.tfops.io/generation": generation.to_string()}
        },
        "status": status
    }))
    .expect("job fixture should deserialize")
}

fn env_value(job: &Job, name: &str) -> Option<String> {
    job.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers[0]
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.clone())
}

fn stopped_at(generation: i64) -> TerraformStatus {
    TerraformStatus {
        phase: Some(RunPhase::Stopped),
        last_observed_generation: Some(generation),
    }
}

#[test]
fn test_new_run_builds_an_apply_job() {
    let run = demo_run(APPLY_EVERYWHERE, 1);
    assert_eq!(
        decide(JobState::from_job(None), None, run.status.as_ref(), 1),
        Decision::Build
    );

    let mut ctx = RunContext::new(&run, false);
    ctx.module = Some(ModuleSource::Remote {
        repo: "https://github.com/example/stacks.git".to_string(),
        commit: "9f1c2ab".to_string(),
        subdir: Some("network".to_string()),
    });
    let config = ControllerConfig::default();
    let image = config.runner_image_for(ctx.terraform_version.as_deref());
    assert_eq!(image, "isaaguilar/tfops:0.12.29");

    let objects = GeneratedObjectSet::build(&ctx, image);
    assert_eq!(objects.job.metadata.name.as_deref(), Some("demo"));
    assert_eq!(
        objects.service_account.metadata.name.as_deref(),
        Some("tf-demo")
    );
    assert_eq!(
        objects.action.data.as_ref().map(|d| d["action"].clone()),
        Some("apply".to_string())
    );
    assert_eq!(job_generation(&objects.job), Some(1));
    assert_eq!(env_value(&objects.job, "IS_NEW_RESOURCE").as_deref(), Some("true"));
    assert_eq!(env_value(&objects.job, "DEPLOYMENT").as_deref(), Some("demo"));
    assert!(env_value(&objects.job, "DESTROY").is_none());
    assert!(objects.ssh_secret.is_none());
}

#[test]
fn test_running_then_stopped() {
    let active = job_json(1, serde_json::json!({"active": 1}));
    assert_eq!(
        decide(JobState::from_job(Some(&active)), Some(1), None, 1),
        Decision::Running
    );

    let succeeded = job_json(1, serde_json::json!({"succeeded": 1}));
    let running = TerraformStatus {
        phase: Some(RunPhase::Running),
        last_observed_generation: None,
    };
    assert_eq!(
        decide(JobState::from_job(Some(&succeeded)), Some(1), Some(&running), 1),
        Decision::Complete
    );
}

#[test]
fn test_spec_change_restarts_finished_job_once() {
    let finished = job_json(1, serde_json::json!({"succeeded": 1}));
    let state = JobState::from_job(Some(&finished));

    // generation 2 after a job built from generation 1
    assert_eq!(
        decide(state, job_generation(&finished), Some(&stopped_at(1)), 2),
        Decision::Restart
    );

    // the rebuilt job finished before `running` was ever recorded
    let rebuilt = job_json(2, serde_json::json!({"succeeded": 1}));
    assert_eq!(
        decide(
            JobState::from_job(Some(&rebuilt)),
            job_generation(&rebuilt),
            Some(&stopped_at(1)),
            2
        ),
        Decision::Complete
    );

    let updated = demo_run(APPLY_EVERYWHERE, 2);
    let ctx = RunContext::new(&updated, false);
    assert!(!ctx.is_new_resource);
    assert_eq!(ctx.action(), "apply");
}

#[test]
fn test_failed_job_waits_for_spec_change() {
    let failed = job_json(3, serde_json::json!({"failed": 2}));
    let state = JobState::from_job(Some(&failed));
    assert_eq!(state, JobState::Failed);
    assert_eq!(decide(state, Some(3), None, 3), Decision::Failed);
    assert_eq!(decide(state, Some(3), None, 4), Decision::Restart);
}

#[test]
fn test_deletion_runs_plan_only_destroy_job() {
    let run = demo_run(APPLY_EVERYWHERE, 2);
    assert_eq!(deletion_step(true, run.spec.config.ignore_delete), DeletionStep::Destroy);

    let ctx = RunContext::new(&run, true);
    assert_eq!(ctx.name, "demo-destroy");
    assert_eq!(ctx.action(), "plan-only");

    let objects = GeneratedObjectSet::build(&ctx, "isaaguilar/tfops:0.12.29".to_string());
    assert_eq!(objects.job.metadata.name.as_deref(), Some("demo-destroy"));
    assert_eq!(
        objects.service_account.metadata.name.as_deref(),
        Some("tf-demo-destroy")
    );
    assert_eq!(env_value(&objects.job, "DESTROY").as_deref(), Some("true"));
    assert!(env_value(&objects.job, "IS_NEW_RESOURCE").is_none());
}

#[test]
fn test_deletion_shortcuts() {
    let run = demo_run("    ignoreDelete: true", 1);
    assert_eq!(
        deletion_step(true, run.spec.config.ignore_delete),
        DeletionStep::ReleaseFinalizer
    );
    assert_eq!(deletion_step(false, false), DeletionStep::Done);
    assert_eq!(deletion_step(false, true), DeletionStep::Done);
}

#[test]
fn test_destroy_outcomes_against_threshold() {
    let threshold = ControllerConfig::default().destroy_failure_threshold;

    let pending = job_json(1, serde_json::json!({"active": 1}));
    assert_eq!(destroy_outcome(&pending, threshold), None);

    let retrying = job_json(1, serde_json::json!({"failed": threshold}));
    assert_eq!(destroy_outcome(&retrying, threshold), None);

    let gave_up = job_json(1, serde_json::json!({"failed": threshold + 1}));
    assert_eq!(destroy_outcome(&gave_up, threshold), Some(DestroyOutcome::GaveUp));

    let done = job_json(1, serde_json::json!({"succeeded": 1, "failed": 3}));
    assert_eq!(destroy_outcome(&done, threshold), Some(DestroyOutcome::Succeeded));
}

#[tokio::test]
async fn test_destroy_wait_is_bounded() {
    let policy = PollPolicy {
        interval: Duration::from_millis(1),
        max_attempts: 3,
    };
    let pending = job_json(1, serde_json::json!({"active": 1}));
    let result = poll_until(policy, |_| {
        let job = pending.clone();
        async move { Ok::<_, std::convert::Infallible>(destroy_outcome(&job, 6)) }
    })
    .await;
    assert_eq!(result, Err(PollExhausted { attempts: 3 }));

    let result = poll_until(policy, |attempt| async move {
        let status = if attempt < 2 {
            serde_json::json!({"active": 1})
        } else {
            serde_json::json!({"succeeded": 1})
        };
        Ok::<_, std::convert::Infallible>(destroy_outcome(&job_json(1, status), 6))
    })
    .await;
    assert_eq!(result, Ok(DestroyOutcome::Succeeded));
}
