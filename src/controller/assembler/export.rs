//! # Export Repository
//!
//! Publishes the merged variable file (and optionally backend settings) to a
//! git repository: fetch, write, commit, push. A bastion tunnel opened for the
//! fetch stays up until the push is done.

use crate::controller::source::{FetchContext, FetchError, FetchedSource, SourceError, SourceFetcher};
use crate::crd::ExportRepo;
use std::path::{Component, Path, PathBuf};
use tracing::{info, info_span, Instrument};

pub const EXPORT_COMMIT_MESSAGE: &str = "terraform operator git commit";

/// Backend settings from a `customBackend` block: every line holding `=`, trimmed
pub fn backend_conf(custom_backend: &str) -> String {
    custom_backend
        .lines()
        .filter(|line| line.contains('='))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write `tfvars` (and the backend conf) into the export repository and push
///
/// Returns `false` when the repository already held identical content.
pub async fn export_config(
    fetcher: &SourceFetcher,
    ctx: &FetchContext<'_>,
    export: &ExportRepo,
    tfvars: &str,
    custom_backend: Option<&str>,
) -> Result<bool, SourceError> {
    let span = info_span!("config.export", repository = export.address.as_str());
    async move {
        let mut fetched = fetcher.fetch_for_push(&export.address, ctx).await?;
        let result = commit_and_push(fetcher, &fetched, export, tfvars, custom_backend).await;
        fetched.close_tunnel().await;
        result
    }
    .instrument(span)
    .await
}

async fn commit_and_push(
    fetcher: &SourceFetcher,
    fetched: &FetchedSource,
    export: &ExportRepo,
    tfvars: &str,
    custom_backend: Option<&str>,
) -> Result<bool, SourceError> {
    let repository = fetcher.repository();
    let workdir = fetched.dir();

    if let Some(branch) = fetched.address.reference.as_deref() {
        repository.checkout_branch(workdir, branch).await?;
    }

    let mut to_commit = Vec::new();
    let tfvars_path = relative_path(&export.tfvars_file)?;
    write_file(workdir, &tfvars_path, tfvars).await?;
    to_commit.push(tfvars_path);

    if let Some(conf_file) = export.conf_file.as_deref().filter(|f| !f.is_empty()) {
        let conf_path = relative_path(conf_file)?;
        let content = custom_backend.map(backend_conf).unwrap_or_default();
        write_file(workdir, &conf_path, &content).await?;
        to_commit.push(conf_path);
    }

    if !repository
        .commit(workdir, &to_commit, EXPORT_COMMIT_MESSAGE)
        .await?
    {
        info!("Export repository already up to date");
        return Ok(false);
    }
    repository
        .push(workdir, &fetched.remote(), fetched.address.reference.as_deref())
        .await?;
    info!(files = to_commit.len(), "Exported configuration");
    Ok(true)
}

/// Reject paths that would escape the working copy
fn relative_path(path: &str) -> Result<PathBuf, FetchError> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || path.is_empty() {
        return Err(FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("export path '{path}' must be relative to the repository root"),
        )));
    }
    Ok(candidate.to_path_buf())
}

async fn write_file(workdir: &Path, relative: &Path, content: &str) -> std::io::Result<()> {
    let full = workdir.join(relative);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(full, content).await
}
