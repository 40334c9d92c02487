//! # Build Pipeline
//!
//! Everything between "no job exists" and "job submitted":
//!
//! 1. Fetch the stack; upload it or point the runner at its commit
//! 2. Resolve the runner's git credential and ssh configuration
//! 3. Fetch every config source and assemble the tfvars ConfigMap
//! 4. Export the merged variables when an export repository is configured
//! 5. Submit the object set

use crate::constants::{DEFAULT_TOKEN_KEY, IS_FILE_EXTRA};
use crate::controller::assembler::{
    assemble_config, collect_source_files, export_config, AssemblyError,
};
use crate::controller::orchestrator::ssh_config::job_ssh_data;
use crate::controller::orchestrator::{archive_module, ModuleSource, RunContext};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::source::{matching_method, FetchContext, ParsedAddress, ResolvedSecretRef};
use crate::crd::Terraform;
use tracing::{debug, info, info_span, Instrument};

/// Run the pipeline for `run`; `is_destroy` builds the `<name>-destroy` derivative
pub async fn build_and_submit(
    reconciler: &Reconciler,
    run: &Terraform,
    is_destroy: bool,
) -> Result<RunContext, ReconcilerError> {
    let mut ctx = RunContext::new(run, is_destroy);
    let span = info_span!(
        "controller.pipeline",
        job = ctx.name.as_str(),
        action = ctx.action()
    );
    async move {
        let spec = &run.spec;
        let namespace = ctx.namespace.clone();
        let fetch_ctx = FetchContext {
            auth_methods: &spec.scm_auth_methods,
            bastion: spec.ssh_tunnel.as_ref(),
            namespace: &namespace,
        };

        let stack = reconciler
            .fetcher
            .fetch(&spec.stack.source.address, &fetch_ctx)
            .await?;
        info!(commit = stack.commit.as_str(), "Fetched stack");

        ctx.module = Some(if spec.stack.upload_module {
            let module_dir = match stack.address.subdirs.first() {
                Some(subdir) => stack.dir().join(subdir),
                None => stack.dir().to_path_buf(),
            };
            let archive = archive_module(&module_dir)?;
            debug!(bytes = archive.len(), "Archived module");
            let config_map = reconciler.orchestrator.publish_module(&ctx, archive).await?;
            ModuleSource::Uploaded {
                config_maps: vec![config_map],
                commit: stack.commit.clone(),
            }
        } else {
            remote_module(&stack.address, &stack.commit)
        });

        ctx.token_secret = matching_method(&spec.scm_auth_methods, &stack.address)
            .and_then(|m| m.git.https.as_ref())
            .map(|https| {
                ResolvedSecretRef::resolve(&https.token_secret_ref, &namespace, DEFAULT_TOKEN_KEY)
            });
        ctx.ssh_config = job_ssh_data(
            spec.ssh_tunnel.as_ref(),
            &spec.scm_auth_methods,
            &namespace,
            reconciler.fetcher.secrets().as_ref(),
        )
        .await?;
        drop(stack);

        let mut collected = Vec::with_capacity(spec.config.sources.len());
        for source in &spec.config.sources {
            let fetched = reconciler.fetcher.fetch(&source.address, &fetch_ctx).await?;
            let files = collect_source_files(
                fetched.dir(),
                &fetched.address.subdirs,
                source.has_extra(IS_FILE_EXTRA),
            )
            .map_err(AssemblyError::from)?;
            debug!(
                source = source.address.as_str(),
                files = files.files.len(),
                "Collected config source"
            );
            collected.push(files);
        }

        let assembled = assemble_config(
            &collected,
            ctx.env_pairs(),
            spec.config.custom_backend.as_deref(),
            spec.config.prerun_script.as_deref(),
        )?;
        reconciler
            .orchestrator
            .publish_config(&mut ctx, &assembled)
            .await?;

        if let Some(export) = &spec.config.export_repo {
            let pushed = export_config(
                &reconciler.fetcher,
                &fetch_ctx,
                export,
                &assembled.tfvars,
                spec.config.custom_backend.as_deref(),
            )
            .await?;
            debug!(pushed, "Export finished");
        }

        let image = reconciler
            .config
            .runner_image_for(ctx.terraform_version.as_deref());
        reconciler.orchestrator.launch(&ctx, image).await?;
        Ok(ctx)
    }
    .instrument(span)
    .await
}

/// Point the runner at `commit` of the stack; the first subdirectory is the module
fn remote_module(address: &ParsedAddress, commit: &str) -> ModuleSource {
    ModuleSource::Remote {
        repo: address.repo.clone(),
        commit: commit.to_string(),
        subdir: address.subdirs.first().cloned(),
    }
}
