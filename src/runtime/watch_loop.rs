//! # Watch Loop
//!
//! Controller watch loop over `Terraform` runs and the Jobs they own. Job
//! status changes wake the owning run immediately instead of waiting for the
//! next requeue.
//!
//! SIGTERM (what the kubelet sends) and SIGINT both mark the controller not
//! ready and end the loop; the controller stream itself stops on the same
//! signals through `shutdown_on_signal`.

use crate::config::SharedControllerConfig;
use crate::constants::{WATCH_BACKOFF_MAX_MS, WATCH_BACKOFF_START_MS};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Terraform;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Shutdown signal listeners, registered before anything waits on them
pub struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the first shutdown signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

/// Run the controller watch loop until a shutdown signal arrives
///
/// The stream is restarted after `WATCH_RESTART_DELAY_SECS` whenever it ends
/// for a reason other than shutdown.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let backoff_ms = Arc::new(AtomicU64::new(WATCH_BACKOFF_START_MS));

    // not ready from the first signal on, so /readyz drains traffic during shutdown
    let mut signals = ShutdownSignals::register()?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_state = server_state.clone();
    tokio::spawn(async move {
        let received = signals.recv().await;
        info!(signal = received, "Received shutdown signal, initiating graceful shutdown...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
        let _ = shutdown_tx.send(true);
    });

    loop {
        if *shutdown_rx.borrow() || !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let runs: Api<Terraform> = Api::all(client.clone());
        let jobs: Api<Job> = Api::all(client.clone());
        let backoff = backoff_ms.clone();
        let restart_delay = controller_config.watch_restart_delay_duration();
        let concurrency = controller_config.max_concurrent_reconciliations;

        let watch_span = info_span!("controller.watch", concurrency);
        async {
            info!("Starting controller watch loop...");
            Controller::new(runs, watcher::Config::default().any_semantic())
                .owns(jobs, watcher::Config::default())
                .with_config(controller::Config::default().concurrency(concurrency))
                .shutdown_on_signal()
                .run(reconcile, handle_reconciliation_error, reconciler.clone())
                .filter_map(move |event| {
                    let backoff = backoff.clone();
                    async move {
                        match &event {
                            Ok((object, _action)) => {
                                backoff.store(WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                                debug!(resource = %object.name, "watch.event.reconciled");
                                Some(event)
                            }
                            Err(e) => {
                                let error_string = format!("{e:?}");
                                handle_watch_stream_error(
                                    &error_string,
                                    &backoff,
                                    WATCH_BACKOFF_MAX_MS,
                                    restart_delay,
                                )
                                .await
                                .map(|()| event)
                            }
                        }
                    }
                })
                .for_each(|_| futures::future::ready(()))
                .await;
        }
        .instrument(watch_span)
        .await;

        if *shutdown_rx.borrow() || !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        // the stream also ends on a signal that the handler task has not flagged yet
        tokio::select! {
            () = tokio::time::sleep(restart_delay) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_is_a_shutdown_signal() {
        let mut signals = ShutdownSignals::register().unwrap();
        let status = tokio::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM should be delivered");
        assert_eq!(received, "SIGTERM");
    }
}
