//! # Terraform Controller
//!
//! A Kubernetes controller that runs Terraform stacks stored in git as
//! supervised one-shot Jobs.
//!
//! For every `Terraform` resource the controller:
//!
//! 1. **Fetches the stack** - clones the stack repository (optionally through an
//!    SSH bastion) with credentials taken from Kubernetes secrets
//! 2. **Assembles configuration** - merges `tfvars` files from the config
//!    sources and inline overrides into one ConfigMap, next to the backend and
//!    prerun script
//! 3. **Submits the runner** - creates a service account, role binding and a
//!    Job running the stack with the configured Terraform version
//! 4. **Supervises the job** - tracks its phase, restarts it on spec changes and
//!    prunes old pods
//! 5. **Destroys on delete** - runs a destroy job before releasing the finalizer
//!
//! ## Configuration
//!
//! All settings come from environment variables, see
//! [`ControllerConfig`](tfops_controller::config::ControllerConfig).

use anyhow::Result;
use tfops_controller::runtime::initialization::initialize;
use tfops_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
