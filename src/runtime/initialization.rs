//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! tool discovery and Kubernetes client setup.

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("controller_config", &self.controller_config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // must run before any client is built; no default provider is selected via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    let mut config = ControllerConfig::from_env();
    init_tracing(&config.log_level, &config.log_format);

    info!("Starting Terraform controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("TFOPS_BUILD_DATETIME"),
        env!("TFOPS_BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    config.git_binary = resolve_binary(&config.git_binary)?;
    config.ssh_binary = resolve_binary(&config.ssh_binary)?;
    let controller_config: SharedControllerConfig = Arc::new(config);
    info!(?controller_config, "Loaded controller configuration");

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = server_state.clone();
    let port = controller_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(
        &server_state,
        &server_handle,
        Duration::from_secs(controller_config.server_startup_timeout_secs),
        Duration::from_millis(controller_config.server_poll_interval_ms),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let reconciler = Arc::new(Reconciler::new(client.clone(), controller_config.clone()));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
    })
}

/// `LOG_LEVEL` applies to this crate only; `RUST_LOG` overrides it entirely
fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tfops_controller={}", log_level.to_lowercase()))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if log_format.eq_ignore_ascii_case("text") {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Absolute path of an executable, looked up on `PATH` unless already a path
fn resolve_binary(name: &str) -> Result<String> {
    let path = which::which(name).with_context(|| format!("`{name}` not found on PATH"))?;
    info!(binary = name, path = %path.display(), "Resolved executable");
    Ok(path.to_string_lossy().into_owned())
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
