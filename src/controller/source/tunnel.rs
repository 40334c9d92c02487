//! # Bastion Tunnels
//!
//! Opens an SSH tunnel through the bastion with the system `ssh` client:
//!
//! - ssh sources get a local TCP forward (`-L`) to the git host's port
//! - http(s) sources get a local SOCKS5 relay (`-D`) used as git's proxy
//!
//! Startup is confirmed by a background task that connects to the local port and
//! signals over a oneshot channel. The wait is bounded by a timeout and fails
//! early if `ssh` exits. The local port is picked before `ssh` binds it, so an
//! early exit (typically a forward that lost the port to another process) is
//! retried on a fresh port. The `ssh` process is killed when the [`Tunnel`]
//! drops.

use async_trait::async_trait;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum TunnelStartError {
    #[error("failed to reserve a local port: {0}")]
    LocalPort(#[source] std::io::Error),
    #[error("failed to spawn ssh for bastion {bastion}: {source}")]
    Spawn {
        bastion: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh tunnel exited before becoming ready ({status})")]
    Exited { status: String },
    #[error("ssh tunnel was not ready within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("tunnel readiness check stopped without a signal")]
    ReadinessAborted,
}

/// What the tunnel carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelKind {
    /// Local port forwarded to `host:port` on the far side of the bastion
    Forward { host: String, port: String },
    /// Dynamic SOCKS5 relay
    Socks,
}

/// Bastion login details
#[derive(Debug, Clone)]
pub struct BastionTarget<'a> {
    /// `host` or `host:port`
    pub host: &'a str,
    pub user: &'a str,
    pub key_path: &'a Path,
}

/// A running tunnel
#[derive(Debug)]
pub struct Tunnel {
    local_port: u16,
    kind: TunnelKind,
    child: Child,
}

impl Tunnel {
    /// Wrap an already running tunnel process listening on `local_port`
    pub fn from_process(local_port: u16, kind: TunnelKind, child: Child) -> Self {
        Self {
            local_port,
            kind,
            child,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Proxy URL for git's `http.proxy`; `None` for port forwards
    pub fn proxy_url(&self) -> Option<String> {
        match self.kind {
            TunnelKind::Socks => Some(format!("socks5h://127.0.0.1:{}", self.local_port)),
            TunnelKind::Forward { .. } => None,
        }
    }

    /// `false` once the `ssh` process has exited
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the tunnel and reap the `ssh` process
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "ssh tunnel already stopped");
        }
    }
}

/// Starts bastion tunnels
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    async fn open(
        &self,
        target: &BastionTarget<'_>,
        kind: TunnelKind,
    ) -> Result<Tunnel, TunnelStartError>;
}

/// [`TunnelOpener`] backed by the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshTunnelOpener {
    pub ssh_binary: String,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
    async fn open(
        &self,
        target: &BastionTarget<'_>,
        kind: TunnelKind,
    ) -> Result<Tunnel, TunnelStartError> {
        open_tunnel(
            &self.ssh_binary,
            target,
            kind,
            self.startup_timeout,
            self.poll_interval,
        )
        .await
    }
}

/// Arguments for the `ssh` invocation
pub fn ssh_tunnel_args(target: &BastionTarget<'_>, kind: &TunnelKind, local_port: u16) -> Vec<String> {
    let (bastion_host, bastion_port) = match target.host.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => (h, p),
        _ => (target.host, "22"),
    };

    let mut args: Vec<String> = [
        "-N",
        "-o",
        "ExitOnForwardFailure=yes",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "BatchMode=yes",
        "-o",
        "ServerAliveInterval=30",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    args.push("-i".to_string());
    args.push(target.key_path.display().to_string());
    args.push("-p".to_string());
    args.push(bastion_port.to_string());

    match kind {
        TunnelKind::Forward { host, port } => {
            args.push("-L".to_string());
            args.push(format!("127.0.0.1:{local_port}:{host}:{port}"));
        }
        TunnelKind::Socks => {
            args.push("-D".to_string());
            args.push(format!("127.0.0.1:{local_port}"));
        }
    }

    args.push(format!("{}@{}", target.user, bastion_host));
    args
}

/// Start a tunnel and wait until it accepts connections
pub async fn open_tunnel(
    ssh_binary: &str,
    target: &BastionTarget<'_>,
    kind: TunnelKind,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<Tunnel, TunnelStartError> {
    let result = retry_on_early_exit(crate::constants::TUNNEL_START_ATTEMPTS, |attempt| {
        start_once(
            ssh_binary,
            target,
            kind.clone(),
            startup_timeout,
            poll_interval,
            attempt,
        )
    })
    .await;

    if let Err(e) = &result {
        warn!(bastion = target.host, error = %e, "ssh tunnel failed to start");
        crate::observability::metrics::increment_tunnel_failures();
    }
    result
}

/// Run `start` until it succeeds, fails with anything but an early `ssh`
/// exit, or `attempts` runs out
pub async fn retry_on_early_exit<T, F, Fut>(attempts: u32, mut start: F) -> Result<T, TunnelStartError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TunnelStartError>>,
{
    let mut attempt = 1;
    loop {
        match start(attempt).await {
            Err(e @ TunnelStartError::Exited { .. }) if attempt < attempts => {
                debug!(attempt, error = %e, "ssh tunnel exited during startup, retrying on a new port");
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn start_once(
    ssh_binary: &str,
    target: &BastionTarget<'_>,
    kind: TunnelKind,
    startup_timeout: Duration,
    poll_interval: Duration,
    attempt: u32,
) -> Result<Tunnel, TunnelStartError> {
    let local_port = reserve_local_port().await?;
    let args = ssh_tunnel_args(target, &kind, local_port);

    let span = tracing::info_span!(
        "source.tunnel.open",
        bastion = target.host,
        local_port = local_port,
        kind = ?kind,
        attempt = attempt
    );

    async move {
        let mut child = Command::new(ssh_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TunnelStartError::Spawn {
                bastion: target.host.to_string(),
                source,
            })?;

        wait_until_ready(&mut child, local_port, startup_timeout, poll_interval).await?;

        // the port may have answered for another process while ssh gave up on it
        if let Ok(Some(status)) = child.try_wait() {
            return Err(TunnelStartError::Exited {
                status: status.to_string(),
            });
        }

        info!("ssh tunnel ready on 127.0.0.1:{}", local_port);
        Ok(Tunnel::from_process(local_port, kind, child))
    }
    .instrument(span)
    .await
}

/// Ask the OS for a free loopback port
async fn reserve_local_port() -> Result<u16, TunnelStartError> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .map_err(TunnelStartError::LocalPort)?;
    let port = listener
        .local_addr()
        .map_err(TunnelStartError::LocalPort)?
        .port();
    Ok(port)
}

/// Wait for `127.0.0.1:<local_port>` to accept a connection while `child` is alive
pub async fn wait_until_ready(
    child: &mut Child,
    local_port: u16,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), TunnelStartError> {
    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let checker = tokio::spawn(async move {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                let _ = ready_tx.send(());
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    });

    let outcome = tokio::time::timeout(startup_timeout, async {
        tokio::select! {
            ready = ready_rx => ready.map_err(|_closed| TunnelStartError::ReadinessAborted),
            status = child.wait() => Err(TunnelStartError::Exited {
                status: status.map_or_else(|e| e.to_string(), |s| s.to_string()),
            }),
        }
    })
    .await;

    checker.abort();
    match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(TunnelStartError::Timeout(startup_timeout)),
    }
}
