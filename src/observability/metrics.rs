//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `tfops_reconciliations_total` - Total number of reconciliations
//! - `tfops_reconciliation_errors_total` - Total number of failed reconciliations
//! - `tfops_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `tfops_jobs_created_total{kind}` - Runner jobs created (`run` or `destroy`)
//! - `tfops_job_restarts_total` - Succeeded jobs deleted because the spec changed
//! - `tfops_source_fetches_total{result}` - Git fetches
//! - `tfops_source_fetch_duration_seconds` - Duration of git fetches
//! - `tfops_tunnel_failures_total` - Bastion tunnels that never became ready
//! - `tfops_pods_pruned_total` - Finished runner pods deleted after retention
//! - `tfops_destroy_runs_total{outcome}` - Finalizations by outcome
//! - `tfops_requeues_total{reason}` - Requeues by state

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tfops_reconciliations_total", "Total number of reconciliations")
        .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfops_reconciliation_errors_total",
        "Total number of failed reconciliations",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "tfops_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static JOBS_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("tfops_jobs_created_total", "Total number of runner jobs created"),
        &["kind"],
    )
    .expect("Failed to create JOBS_CREATED_TOTAL metric - this should never happen")
});

static JOB_RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfops_job_restarts_total",
        "Total number of succeeded jobs deleted after a spec change",
    )
    .expect("Failed to create JOB_RESTARTS_TOTAL metric - this should never happen")
});

static SOURCE_FETCHES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("tfops_source_fetches_total", "Total number of git fetches"),
        &["result"],
    )
    .expect("Failed to create SOURCE_FETCHES_TOTAL metric - this should never happen")
});

static SOURCE_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "tfops_source_fetch_duration_seconds",
            "Duration of git fetches in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create SOURCE_FETCH_DURATION metric - this should never happen")
});

static TUNNEL_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfops_tunnel_failures_total",
        "Total number of bastion tunnels that failed to start",
    )
    .expect("Failed to create TUNNEL_FAILURES_TOTAL metric - this should never happen")
});

static PODS_PRUNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfops_pods_pruned_total",
        "Total number of finished runner pods deleted after the retention window",
    )
    .expect("Failed to create PODS_PRUNED_TOTAL metric - this should never happen")
});

static POD_PRUNE_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfops_pod_prune_failures_total",
        "Total number of expired runner pods that could not be deleted",
    )
    .expect("Failed to create POD_PRUNE_FAILURES_TOTAL metric - this should never happen")
});

static DESTROY_RUNS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("tfops_destroy_runs_total", "Total number of finalizations"),
        &["outcome"],
    )
    .expect("Failed to create DESTROY_RUNS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("tfops_requeues_total", "Total number of requeues by reason"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate registration"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(JOBS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FETCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(TUNNEL_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PODS_PRUNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POD_PRUNE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DESTROY_RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

/// Text exposition of every registered metric
pub fn gather_text() -> Result<String> {
    let encoder = prometheus::TextEncoder::new();
    Ok(encoder.encode_to_string(&REGISTRY.gather())?)
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_jobs_created(destroy: bool) {
    JOBS_CREATED_TOTAL
        .with_label_values(&[if destroy { "destroy" } else { "run" }])
        .inc();
}

pub fn increment_job_restarts() {
    JOB_RESTARTS_TOTAL.inc();
}

pub fn observe_fetch(result: &str, duration: f64) {
    SOURCE_FETCHES_TOTAL.with_label_values(&[result]).inc();
    SOURCE_FETCH_DURATION.observe(duration);
}

pub fn increment_tunnel_failures() {
    TUNNEL_FAILURES_TOTAL.inc();
}

pub fn increment_pods_pruned(count: u64) {
    PODS_PRUNED_TOTAL.inc_by(count);
}

pub fn increment_pod_prune_failures(count: u64) {
    POD_PRUNE_FAILURES_TOTAL.inc_by(count);
}

pub fn increment_destroy_runs(outcome: &str) {
    DESTROY_RUNS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
