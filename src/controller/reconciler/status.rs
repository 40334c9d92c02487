//! # Status and Finalizer Updates
//!
//! Every write carries the resource version the pass observed, so a write
//! based on a stale copy fails with a conflict instead of clobbering a newer
//! one.

use crate::constants::TERRAFORM_FINALIZER;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{RunPhase, Terraform, TerraformStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Merge patch moving the status to `phase`, `None` when nothing would change
///
/// `generation` is recorded as `lastObservedGeneration` when given; the
/// recorded value is kept otherwise.
pub fn status_patch(run: &Terraform, phase: RunPhase, generation: Option<i64>) -> Option<Value> {
    let current = run.status.clone().unwrap_or_default();
    let desired = TerraformStatus {
        phase: Some(phase),
        last_observed_generation: generation.or(current.last_observed_generation),
    };
    if desired == current {
        return None;
    }
    Some(json!({
        "metadata": { "resourceVersion": run.metadata.resource_version },
        "status": desired,
    }))
}

/// Merge patch adding or removing the finalizer, `None` when already in place
pub fn finalizer_patch(run: &Terraform, present: bool) -> Option<Value> {
    if run.has_finalizer(TERRAFORM_FINALIZER) == present {
        return None;
    }
    let mut finalizers: Vec<String> = run
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != TERRAFORM_FINALIZER)
        .collect();
    if present {
        finalizers.push(TERRAFORM_FINALIZER.to_string());
    }
    Some(json!({
        "metadata": {
            "resourceVersion": run.metadata.resource_version,
            "finalizers": finalizers,
        }
    }))
}

fn api(reconciler: &Reconciler, run: &Terraform) -> Api<Terraform> {
    Api::namespaced(reconciler.client.clone(), run.run_namespace())
}

pub async fn update_phase(
    reconciler: &Reconciler,
    run: &Terraform,
    phase: RunPhase,
    generation: Option<i64>,
) -> Result<(), ReconcilerError> {
    let Some(patch) = status_patch(run, phase, generation) else {
        debug!(phase = phase.as_str(), "Skipping status update - unchanged");
        return Ok(());
    };
    api(reconciler, run)
        .patch_status(
            run.run_name(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(ReconcilerError::kube("update run status"))?;
    info!(phase = phase.as_str(), "Updated run status");
    Ok(())
}

/// Add (`present = true`) or remove the finalizer; returns the updated run
pub async fn set_finalizer(
    reconciler: &Reconciler,
    run: &Terraform,
    present: bool,
) -> Result<Terraform, ReconcilerError> {
    let Some(patch) = finalizer_patch(run, present) else {
        return Ok(run.clone());
    };
    let updated = api(reconciler, run)
        .patch(run.run_name(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(ReconcilerError::kube(if present {
            "add finalizer"
        } else {
            "remove finalizer"
        }))?;
    info!(present, "Updated finalizer");
    Ok(updated)
}

/// Data of the `<name>-status` ConfigMap the runner writes
pub async fn read_status_config_map(
    reconciler: &Reconciler,
    run: &Terraform,
) -> Result<BTreeMap<String, String>, ReconcilerError> {
    let name = format!("{}-status", run.run_name());
    let config_maps: Api<ConfigMap> =
        Api::namespaced(reconciler.client.clone(), run.run_namespace());
    let cm = config_maps
        .get(&name)
        .await
        .map_err(|source| ReconcilerError::StatusRead { name, source })?;
    Ok(cm.data.unwrap_or_default())
}
