//! # Job Orchestrator
//!
//! Builds and submits everything one execution needs.
//!
//! ## Module Structure
//!
//! - `run_context.rs` - Per-pass execution description
//! - `objects.rs` - Pure object builders
//! - `ssh_config.rs` - Runner `~/.ssh` contents
//! - `upload.rs` - Module archives for upload mode
//! - `submit.rs` - Create-or-update against the API server
//!
//! Submission order is service account, role, role binding, action ConfigMap,
//! ssh secret, job. ConfigMaps the job mounts are published before that.

pub mod objects;
pub mod run_context;
pub mod ssh_config;
pub mod submit;
pub mod upload;

pub use run_context::{ModuleSource, RunContext};
pub use submit::{submit, Mutability, SubmissionError, SubmitOutcome};
pub use upload::{archive_module, UploadError, MODULE_ARCHIVE_KEY};

use crate::controller::assembler::AssembledConfig;
use crate::observability;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::{Api, Client};
use tracing::{info, info_span, Instrument};

/// The objects of one execution, in submission order
#[derive(Debug, Clone)]
pub struct GeneratedObjectSet {
    pub service_account: ServiceAccount,
    pub role: Role,
    pub role_binding: RoleBinding,
    pub action: ConfigMap,
    pub ssh_secret: Option<Secret>,
    pub job: Job,
}

impl GeneratedObjectSet {
    pub fn build(ctx: &RunContext, image: String) -> Self {
        Self {
            service_account: objects::service_account(ctx),
            role: objects::role(ctx),
            role_binding: objects::role_binding(ctx),
            action: objects::action_config_map(ctx),
            ssh_secret: objects::ssh_secret(ctx),
            job: objects::job(ctx, image),
        }
    }
}

#[derive(Clone)]
pub struct JobOrchestrator {
    client: Client,
}

impl JobOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Publish the assembled configuration and record it on the context
    pub async fn publish_config(
        &self,
        ctx: &mut RunContext,
        config: &AssembledConfig,
    ) -> Result<(), SubmissionError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &ctx.namespace);
        let cm = objects::tfvars_config_map(ctx, config);
        submit(&api, &cm, Mutability::Mutable).await?;
        ctx.tfvars_config_map = Some(ctx.tfvars_config_map_name());
        Ok(())
    }

    /// Publish an uploaded module archive and return its ConfigMap name
    pub async fn publish_module(
        &self,
        ctx: &RunContext,
        archive: Vec<u8>,
    ) -> Result<String, SubmissionError> {
        let name = ctx.module_config_map_name();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &ctx.namespace);
        let cm = objects::module_config_map(ctx, name.clone(), MODULE_ARCHIVE_KEY, archive);
        submit(&api, &cm, Mutability::Mutable).await?;
        Ok(name)
    }

    /// Submit the object set of `ctx`
    pub async fn launch(&self, ctx: &RunContext, image: String) -> Result<(), SubmissionError> {
        let span = info_span!(
            "orchestrator.launch",
            job = ctx.name.as_str(),
            namespace = ctx.namespace.as_str(),
            action = ctx.action()
        );
        async move {
            let set = GeneratedObjectSet::build(ctx, image);
            let ns = ctx.namespace.as_str();

            let service_accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), ns);
            submit(&service_accounts, &set.service_account, Mutability::Immutable).await?;

            let roles: Api<Role> = Api::namespaced(self.client.clone(), ns);
            submit(&roles, &set.role, Mutability::Immutable).await?;

            let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), ns);
            submit(&bindings, &set.role_binding, Mutability::Immutable).await?;

            let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), ns);
            submit(&config_maps, &set.action, Mutability::Mutable).await?;

            if let Some(secret) = &set.ssh_secret {
                let secrets: Api<Secret> = Api::namespaced(self.client.clone(), ns);
                submit(&secrets, secret, Mutability::Mutable).await?;
            }

            let jobs: Api<Job> = Api::namespaced(self.client.clone(), ns);
            if submit(&jobs, &set.job, Mutability::Immutable).await? == SubmitOutcome::Created {
                observability::metrics::increment_jobs_created(ctx.is_destroy);
                info!("Runner job created");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
