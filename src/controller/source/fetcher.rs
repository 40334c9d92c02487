//! # Source Fetcher
//!
//! Resolves an address, picks its credential, opens a bastion tunnel when one
//! is configured, and clones the repository into a private temporary
//! directory. A failed fetch drops the directory, so callers only ever see
//! complete working copies.
//!
//! [`SourceFetcher::fetch`] closes the tunnel once the clone is done.
//! [`SourceFetcher::fetch_for_push`] leaves it to the [`FetchedSource`], which
//! keeps it running until [`FetchedSource::close_tunnel`] or drop, so a later
//! push reaches the remote the same way the clone did.

use crate::controller::source::address::{parse_address, AddressParseError, ParsedAddress, Protocol};
use crate::controller::source::credentials::{
    load_bastion_key, select_credential, CredentialError, GitCredential, SecretStore,
    SecretStoreError,
};
use crate::controller::source::repository::{
    FetchAuth, FetchError, FetchRequest, Remote, SourceRepository,
};
use crate::controller::source::tunnel::{
    BastionTarget, SshTunnelOpener, Tunnel, TunnelKind, TunnelOpener, TunnelStartError,
};
use crate::crd::{ScmAuthMethod, SshTunnel};
use crate::observability;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Address(#[from] AddressParseError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to load bastion key: {0}")]
    BastionKey(#[source] SecretStoreError),
    #[error(transparent)]
    Tunnel(#[from] TunnelStartError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Fetch(FetchError::Io(e))
    }
}

/// Per-run inputs shared by every fetch of a pass
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub auth_methods: &'a [ScmAuthMethod],
    pub bastion: Option<&'a SshTunnel>,
    /// Namespace used for secret references without one
    pub namespace: &'a str,
}

/// Credential a working copy was fetched with, kept for pushes
enum AccessCredential {
    /// Key file inside the workspace
    SshKey(PathBuf),
    Token(Zeroizing<String>),
    Anonymous,
}

impl AccessCredential {
    fn auth(&self) -> FetchAuth<'_> {
        match self {
            AccessCredential::SshKey(path) => FetchAuth::SshKey(path),
            AccessCredential::Token(token) => FetchAuth::Token(token.as_str()),
            AccessCredential::Anonymous => FetchAuth::Anonymous,
        }
    }
}

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessCredential::SshKey(path) => f.debug_tuple("SshKey").field(path).finish(),
            AccessCredential::Token(_) => f.write_str("Token(***)"),
            AccessCredential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// A complete working copy; the directory is removed and any tunnel stopped on drop
#[derive(Debug)]
pub struct FetchedSource {
    pub address: ParsedAddress,
    pub commit: String,
    repo_dir: PathBuf,
    /// URL the clone used; points into the tunnel for ssh sources behind a bastion
    remote_url: String,
    proxy: Option<String>,
    credential: AccessCredential,
    tunnel: Option<Tunnel>,
    _workspace: TempDir,
}

impl FetchedSource {
    pub fn dir(&self) -> &Path {
        &self.repo_dir
    }

    /// How to reach the repository again, with the credential and proxy of the fetch
    pub fn remote(&self) -> Remote<'_> {
        Remote {
            url: &self.remote_url,
            auth: self.credential.auth(),
            proxy: self.proxy.as_deref(),
        }
    }

    /// `true` while a bastion tunnel is held open for this working copy
    pub fn tunnel_running(&mut self) -> bool {
        self.tunnel.as_mut().is_some_and(Tunnel::is_running)
    }

    /// Stop the bastion tunnel, if one is held
    pub async fn close_tunnel(&mut self) {
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }
}

/// Drives [`SourceRepository`] with credentials and tunnels applied
#[derive(Clone)]
pub struct SourceFetcher {
    repository: Arc<dyn SourceRepository>,
    secrets: Arc<dyn SecretStore>,
    tunnels: Arc<dyn TunnelOpener>,
    work_root: Option<PathBuf>,
}

impl std::fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("work_root", &self.work_root)
            .finish_non_exhaustive()
    }
}

impl SourceFetcher {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        secrets: Arc<dyn SecretStore>,
        ssh_binary: impl Into<String>,
        work_root: Option<PathBuf>,
        tunnel_startup_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            secrets,
            tunnels: Arc::new(SshTunnelOpener {
                ssh_binary: ssh_binary.into(),
                startup_timeout: tunnel_startup_timeout,
                poll_interval: Duration::from_millis(
                    crate::constants::DEFAULT_TUNNEL_POLL_INTERVAL_MS,
                ),
            }),
            work_root,
        }
    }

    /// Replace how bastion tunnels are started
    pub fn with_tunnel_opener(mut self, tunnels: Arc<dyn TunnelOpener>) -> Self {
        self.tunnels = tunnels;
        self
    }

    pub fn repository(&self) -> &Arc<dyn SourceRepository> {
        &self.repository
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// Parse `address` and fetch it; any bastion tunnel is closed afterwards
    pub async fn fetch(
        &self,
        address: &str,
        ctx: &FetchContext<'_>,
    ) -> Result<FetchedSource, SourceError> {
        let parsed = parse_address(address)?;
        self.fetch_parsed(parsed, ctx).await
    }

    /// Fetch an already parsed address; any bastion tunnel is closed afterwards
    pub async fn fetch_parsed(
        &self,
        address: ParsedAddress,
        ctx: &FetchContext<'_>,
    ) -> Result<FetchedSource, SourceError> {
        let mut fetched = self.fetch_observed(address, ctx).await?;
        fetched.close_tunnel().await;
        Ok(fetched)
    }

    /// Parse `address` and fetch it, keeping any bastion tunnel open for a push
    pub async fn fetch_for_push(
        &self,
        address: &str,
        ctx: &FetchContext<'_>,
    ) -> Result<FetchedSource, SourceError> {
        let parsed = parse_address(address)?;
        self.fetch_observed(parsed, ctx).await
    }

    async fn fetch_observed(
        &self,
        address: ParsedAddress,
        ctx: &FetchContext<'_>,
    ) -> Result<FetchedSource, SourceError> {
        let span = info_span!(
            "source.fetch",
            repository = address.repo.as_str(),
            protocol = address.protocol.as_str(),
            reference = address.reference.as_deref().unwrap_or("HEAD")
        );
        let start = Instant::now();
        let result = self.fetch_inner(address, ctx).instrument(span).await;

        observability::metrics::observe_fetch(
            if result.is_ok() { "success" } else { "error" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    async fn fetch_inner(
        &self,
        address: ParsedAddress,
        ctx: &FetchContext<'_>,
    ) -> Result<FetchedSource, SourceError> {
        let credential =
            select_credential(ctx.auth_methods, &address, ctx.namespace, self.secrets.as_ref())
                .await?;

        let workspace = self.create_workspace()?;
        let ssh_dir = workspace.path().join(".ssh");
        let repo_dir = workspace.path().join("repo");

        let key_path = match &credential {
            GitCredential::Ssh { private_key } => {
                Some(write_private_key(&ssh_dir, "id_rsa", private_key).await?)
            }
            _ => None,
        };

        let tunnel = match ctx.bastion {
            Some(bastion) => Some(self.start_tunnel(bastion, &address, ctx, &ssh_dir).await?),
            None => None,
        };

        let remote_url = match (&tunnel, &address.protocol) {
            (Some(t), Protocol::Ssh) => address.tunnelled_ssh_url(t.local_port()),
            _ => address.repo.clone(),
        };
        let proxy = tunnel.as_ref().and_then(Tunnel::proxy_url);

        let credential_kind = credential.kind();
        let access = match (credential, key_path) {
            (GitCredential::Https { token, .. }, _) => AccessCredential::Token(token),
            (GitCredential::Ssh { .. }, Some(path)) => AccessCredential::SshKey(path),
            _ => AccessCredential::Anonymous,
        };

        debug!(url = remote_url.as_str(), credential = credential_kind, "Cloning");
        let fetched = self
            .repository
            .fetch_at(&FetchRequest {
                remote: Remote {
                    url: &remote_url,
                    auth: access.auth(),
                    proxy: proxy.as_deref(),
                },
                local_dir: &repo_dir,
                reference: address.reference.as_deref(),
            })
            .await;

        let commit = match fetched {
            Ok(commit) => commit,
            Err(e) => {
                if let Some(tunnel) = tunnel {
                    tunnel.close().await;
                }
                return Err(e.into());
            }
        };
        Ok(FetchedSource {
            address,
            commit,
            repo_dir,
            remote_url,
            proxy,
            credential: access,
            tunnel,
            _workspace: workspace,
        })
    }

    async fn start_tunnel(
        &self,
        bastion: &SshTunnel,
        address: &ParsedAddress,
        ctx: &FetchContext<'_>,
        ssh_dir: &Path,
    ) -> Result<Tunnel, SourceError> {
        let bastion_key = load_bastion_key(bastion, ctx.namespace, self.secrets.as_ref())
            .await
            .map_err(SourceError::BastionKey)?;
        let key_path = write_private_key(ssh_dir, "proxy_key", &bastion_key).await?;

        let kind = if address.protocol.is_http() {
            TunnelKind::Socks
        } else {
            TunnelKind::Forward {
                host: address.host.clone(),
                port: address.port.clone(),
            }
        };

        let target = BastionTarget {
            host: &bastion.host,
            user: &bastion.user,
            key_path: &key_path,
        };
        Ok(self.tunnels.open(&target, kind).await?)
    }

    fn create_workspace(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tfops-src-");
        match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

/// Write key material to `<dir>/<name>` with mode 0600
async fn write_private_key(dir: &Path, name: &str, key: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&path).await?;
    file.write_all(key.as_bytes()).await?;
    if !key.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(path)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// One recorded `push`
    #[derive(Debug, Clone)]
    pub struct RecordedPush {
        pub workdir: PathBuf,
        pub branch: Option<String>,
        pub url: String,
        pub proxy: Option<String>,
        /// Whether every tunnel handed out by the paired opener was still running
        pub tunnels_running: Option<bool>,
    }

    /// Records fetches and populates working copies from in-memory file trees
    #[derive(Default)]
    pub struct FakeRepository {
        /// Repository URL to `(relative path, content)` pairs
        pub trees: HashMap<String, Vec<(String, String)>>,
        pub fetches: Mutex<Vec<(String, Option<String>, String)>>,
        pub pushes: Mutex<Vec<RecordedPush>>,
        pub commits: Mutex<Vec<(Vec<PathBuf>, String)>>,
        pub branches: Mutex<Vec<String>>,
        /// Tunnels to inspect at push time
        pub tunnels: Option<Arc<FakeTunnelOpener>>,
    }

    impl FakeRepository {
        pub fn with_tree(mut self, url: &str, files: &[(&str, &str)]) -> Self {
            self.trees.insert(
                url.to_string(),
                files
                    .iter()
                    .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
                    .collect(),
            );
            self
        }

        pub fn watching(mut self, tunnels: Arc<FakeTunnelOpener>) -> Self {
            self.tunnels = Some(tunnels);
            self
        }
    }

    #[async_trait]
    impl SourceRepository for FakeRepository {
        async fn fetch_at(&self, request: &FetchRequest<'_>) -> Result<String, FetchError> {
            let url = request.remote.url;
            let auth = match request.remote.auth {
                FetchAuth::SshKey(_) => "ssh",
                FetchAuth::Token(_) => "token",
                FetchAuth::Anonymous => "anonymous",
            };
            self.fetches.lock().unwrap().push((
                url.to_string(),
                request.reference.map(str::to_string),
                auth.to_string(),
            ));
            let files = self.trees.get(url).ok_or_else(|| FetchError::Git {
                operation: "clone",
                target: url.to_string(),
                stderr: "repository not found".to_string(),
            })?;
            std::fs::create_dir_all(request.local_dir)?;
            for (path, content) in files {
                let full = request.local_dir.join(path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(full, content)?;
            }
            Ok(format!("{:0>40}", files.len()))
        }

        async fn checkout_branch(&self, _workdir: &Path, branch: &str) -> Result<(), FetchError> {
            self.branches.lock().unwrap().push(branch.to_string());
            Ok(())
        }

        async fn commit(
            &self,
            _workdir: &Path,
            paths: &[PathBuf],
            message: &str,
        ) -> Result<bool, FetchError> {
            self.commits
                .lock()
                .unwrap()
                .push((paths.to_vec(), message.to_string()));
            Ok(true)
        }

        async fn push(
            &self,
            workdir: &Path,
            remote: &Remote<'_>,
            branch: Option<&str>,
        ) -> Result<(), FetchError> {
            let tunnels_running = self.tunnels.as_ref().map(|t| t.all_running());
            self.pushes.lock().unwrap().push(RecordedPush {
                workdir: workdir.to_path_buf(),
                branch: branch.map(str::to_string),
                url: remote.url.to_string(),
                proxy: remote.proxy.map(str::to_string),
                tunnels_running,
            });
            Ok(())
        }
    }

    /// Hands out tunnels backed by a `sleep` process on a fixed local port
    pub struct FakeTunnelOpener {
        pub local_port: u16,
        /// Process ids of every tunnel handed out
        pub pids: Mutex<Vec<u32>>,
    }

    impl FakeTunnelOpener {
        pub fn new(local_port: u16) -> Self {
            Self {
                local_port,
                pids: Mutex::new(Vec::new()),
            }
        }

        /// `true` when at least one tunnel was opened and none has stopped
        pub fn all_running(&self) -> bool {
            let pids = self.pids.lock().unwrap();
            !pids.is_empty() && pids.iter().all(|pid| process_running(*pid))
        }
    }

    /// Alive and not a zombie
    fn process_running(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let state = stat.rsplit_once(')')?.1.trim_start().chars().next()?;
                Some(state != 'Z' && state != 'X')
            })
            .unwrap_or(false)
    }

    #[async_trait]
    impl TunnelOpener for FakeTunnelOpener {
        async fn open(
            &self,
            _target: &BastionTarget<'_>,
            kind: TunnelKind,
        ) -> Result<Tunnel, TunnelStartError> {
            let child = tokio::process::Command::new("sleep")
                .arg("30")
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| TunnelStartError::Spawn {
                    bastion: "fake".to_string(),
                    source,
                })?;
            if let Some(pid) = child.id() {
                self.pids.lock().unwrap().push(pid);
            }
            Ok(Tunnel::from_process(self.local_port, kind, child))
        }
    }
}
