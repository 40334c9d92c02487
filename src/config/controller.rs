//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long to wait for the HTTP server to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Poll interval while waiting for the HTTP server (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Image repository of the runner container; the tag is the Terraform version
    pub runner_image: String,
    /// Terraform version used when a stack declares none
    pub default_terraform_version: String,
    /// Requeue interval while the job is running (seconds)
    pub running_requeue_secs: u64,
    /// Requeue interval after the job succeeded (seconds)
    pub stopped_requeue_secs: u64,
    /// Requeue interval while a deleted job is still terminating (seconds)
    pub terminating_requeue_secs: u64,
    /// Age after which pods of a finished job are deleted (hours)
    pub pod_retention_hours: i64,
    /// Interval between destroy-job checks during finalization (seconds)
    pub destroy_poll_interval_secs: u64,
    /// Failed count above which a destroy job is given up on
    pub destroy_failure_threshold: i32,
    /// Maximum number of destroy-job checks before finalization errors out
    pub destroy_max_attempts: u32,
    /// Startup budget for a bastion tunnel (seconds)
    pub tunnel_startup_timeout_secs: u64,
    /// Root directory for temporary working copies (system temp dir when unset)
    pub work_dir: Option<PathBuf>,
    /// `git` executable
    pub git_binary: String,
    /// `ssh` executable
    pub ssh_binary: String,
    /// Fibonacci backoff lower bound for failed passes (minutes)
    pub error_backoff_min_minutes: u64,
    /// Fibonacci backoff upper bound for failed passes (minutes)
    pub error_backoff_max_minutes: u64,
    /// Consecutive failures after which a run waits for a spec change (0 disables the cap)
    pub max_consecutive_errors: u32,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Maximum concurrent reconciliations
    /// Limits how many runs can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            runner_image: DEFAULT_RUNNER_IMAGE.to_string(),
            default_terraform_version: DEFAULT_TERRAFORM_VERSION.to_string(),
            running_requeue_secs: DEFAULT_RUNNING_REQUEUE_SECS,
            stopped_requeue_secs: DEFAULT_STOPPED_REQUEUE_SECS,
            terminating_requeue_secs: DEFAULT_TERMINATING_REQUEUE_SECS,
            pod_retention_hours: DEFAULT_POD_RETENTION_HOURS,
            destroy_poll_interval_secs: DEFAULT_DESTROY_POLL_INTERVAL_SECS,
            destroy_failure_threshold: DEFAULT_DESTROY_FAILURE_THRESHOLD,
            destroy_max_attempts: DEFAULT_DESTROY_MAX_ATTEMPTS,
            tunnel_startup_timeout_secs: DEFAULT_TUNNEL_STARTUP_TIMEOUT_SECS,
            work_dir: None,
            git_binary: "git".to_string(),
            ssh_binary: "ssh".to_string(),
            error_backoff_min_minutes: DEFAULT_ERROR_BACKOFF_MIN_MINUTES,
            error_backoff_max_minutes: DEFAULT_ERROR_BACKOFF_MAX_MINUTES,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            runner_image: env_var_or_default_str("RUNNER_IMAGE", DEFAULT_RUNNER_IMAGE),
            default_terraform_version: env_var_or_default_str(
                "DEFAULT_TERRAFORM_VERSION",
                DEFAULT_TERRAFORM_VERSION,
            ),
            running_requeue_secs: env_var_or_default(
                "RUNNING_REQUEUE_SECS",
                DEFAULT_RUNNING_REQUEUE_SECS,
            ),
            stopped_requeue_secs: env_var_or_default(
                "STOPPED_REQUEUE_SECS",
                DEFAULT_STOPPED_REQUEUE_SECS,
            ),
            terminating_requeue_secs: env_var_or_default(
                "TERMINATING_REQUEUE_SECS",
                DEFAULT_TERMINATING_REQUEUE_SECS,
            ),
            pod_retention_hours: env_var_or_default(
                "POD_RETENTION_HOURS",
                DEFAULT_POD_RETENTION_HOURS,
            ),
            destroy_poll_interval_secs: env_var_or_default(
                "DESTROY_POLL_INTERVAL_SECS",
                DEFAULT_DESTROY_POLL_INTERVAL_SECS,
            ),
            destroy_failure_threshold: env_var_or_default(
                "DESTROY_FAILURE_THRESHOLD",
                DEFAULT_DESTROY_FAILURE_THRESHOLD,
            ),
            destroy_max_attempts: env_var_or_default(
                "DESTROY_MAX_ATTEMPTS",
                DEFAULT_DESTROY_MAX_ATTEMPTS,
            ),
            tunnel_startup_timeout_secs: env_var_or_default(
                "TUNNEL_STARTUP_TIMEOUT_SECS",
                DEFAULT_TUNNEL_STARTUP_TIMEOUT_SECS,
            ),
            work_dir: std::env::var("WORK_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            git_binary: env_var_or_default_str("GIT_BINARY", "git"),
            ssh_binary: env_var_or_default_str("SSH_BINARY", "ssh"),
            error_backoff_min_minutes: env_var_or_default(
                "ERROR_BACKOFF_MIN_MINUTES",
                DEFAULT_ERROR_BACKOFF_MIN_MINUTES,
            ),
            error_backoff_max_minutes: env_var_or_default(
                "ERROR_BACKOFF_MAX_MINUTES",
                DEFAULT_ERROR_BACKOFF_MAX_MINUTES,
            ),
            max_consecutive_errors: env_var_or_default(
                "MAX_CONSECUTIVE_ERRORS",
                DEFAULT_MAX_CONSECUTIVE_ERRORS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
        }
    }

    pub fn running_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.running_requeue_secs)
    }

    pub fn stopped_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.stopped_requeue_secs)
    }

    pub fn terminating_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.terminating_requeue_secs)
    }

    pub fn destroy_poll_interval(&self) -> Duration {
        Duration::from_secs(self.destroy_poll_interval_secs)
    }

    pub fn tunnel_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_startup_timeout_secs)
    }

    /// Pod retention window as a chrono duration, for comparing with pod start times
    pub fn pod_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.pod_retention_hours)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Runner image reference for a Terraform version (`None` falls back to the default version)
    pub fn runner_image_for(&self, terraform_version: Option<&str>) -> String {
        let version = terraform_version
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_terraform_version);
        format!("{}:{}", self.runner_image, version)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
