//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Durations and thresholds here are defaults; most of them can be overridden
//! through [`crate::config::ControllerConfig`].

/// Finalizer token identifying this controller's cleanup obligation on a run
pub const TERRAFORM_FINALIZER: &str = "finalizer.tf.tfops.io";

/// Name used as the reporting component on Kubernetes events
pub const CONTROLLER_NAME: &str = "terraform-controller";

/// Suffix appended to the run name for the destroy derivative
pub const DESTROY_SUFFIX: &str = "-destroy";

/// Prefix of the per-run service account name
pub const SERVICE_ACCOUNT_PREFIX: &str = "tf-";

/// Label the Job controller puts on every pod it creates
pub const JOB_NAME_LABEL: &str = "job-name";

/// Annotation on the Job recording the run generation it was built from
pub const GENERATION_ANNOTATION: &str = "tf.tfops.io/generation";

/// Annotation on the tfvars ConfigMap holding the SHA-256 of the merged variable file
pub const TFVARS_CHECKSUM_ANNOTATION: &str = "tf.tfops.io/tfvars-sha256";

/// Root under which every volume is mounted inside the runner container
pub const TFOPS_MOUNT_ROOT: &str = "/tfops";

/// Prefix marking an environment override as a Terraform variable
pub const TF_VAR_PREFIX: &str = "TF_VAR_";

/// Extras flag on a config source: its subdirectories are file paths
pub const IS_FILE_EXTRA: &str = "is-file";

/// Default Terraform version when the stack declares none
pub const DEFAULT_TERRAFORM_VERSION: &str = "0.11.14";

/// Default runner image repository (tag is the Terraform version)
pub const DEFAULT_RUNNER_IMAGE: &str = "isaaguilar/tfops";

/// Default key holding an SSH private key inside a secret
pub const DEFAULT_SSH_KEY: &str = "id_rsa";

/// Default key holding an HTTPS token inside a secret
pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Default user for git addresses without one
pub const DEFAULT_GIT_USER: &str = "git";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Requeue interval while the job still has active pods
pub const DEFAULT_RUNNING_REQUEUE_SECS: u64 = 30;

/// Requeue interval after the job succeeded
pub const DEFAULT_STOPPED_REQUEUE_SECS: u64 = 60;

/// Requeue interval while a deleted job is still terminating
pub const DEFAULT_TERMINATING_REQUEUE_SECS: u64 = 5;

/// How long pods of a finished job are kept around
pub const DEFAULT_POD_RETENTION_HOURS: i64 = 6;

/// Interval between destroy-job status checks during finalization
pub const DEFAULT_DESTROY_POLL_INTERVAL_SECS: u64 = 30;

/// Destroy job is given up on once its failed count exceeds this
pub const DEFAULT_DESTROY_FAILURE_THRESHOLD: i32 = 6;

/// Hard cap on destroy-job status checks (120 x 30s = 1h)
pub const DEFAULT_DESTROY_MAX_ATTEMPTS: u32 = 120;

/// How long a bastion tunnel gets to start accepting connections
pub const DEFAULT_TUNNEL_STARTUP_TIMEOUT_SECS: u64 = 30;

/// Interval between tunnel readiness checks
pub const DEFAULT_TUNNEL_POLL_INTERVAL_MS: u64 = 50;

/// Fresh local ports tried when `ssh` exits during tunnel startup
pub const TUNNEL_START_ATTEMPTS: u32 = 3;

/// Default Fibonacci backoff bounds for reconciliation errors (minutes)
pub const DEFAULT_ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_ERROR_BACKOFF_MAX_MINUTES: u64 = 10;

/// Consecutive failed passes after which a run waits for a spec change (0 = never)
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 20;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Watch backoff bounds when the API server throttles the stream (milliseconds)
pub const WATCH_BACKOFF_START_MS: u64 = 1_000;
pub const WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default maximum concurrent reconciliations
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Largest module archive that fits a ConfigMap (1 MiB minus metadata headroom)
pub const MAX_MODULE_ARCHIVE_BYTES: usize = 1_000_000;
