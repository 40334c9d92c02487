//! # Types
//!
//! Core types for the reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::assembler::AssemblyError;
use crate::controller::backoff::BackoffState;
use crate::controller::events::{EventPublisher, KubeEventPublisher};
use crate::controller::orchestrator::{JobOrchestrator, SubmissionError, UploadError};
use crate::controller::source::{
    GitCli, KubeSecretStore, SecretStoreError, SourceError, SourceFetcher,
};
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("failed to load ssh configuration for the runner: {0}")]
    SshConfig(#[from] SecretStoreError),
    #[error("failed to read status ConfigMap {name}: {source}")]
    StatusRead {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to {operation}: {source}")]
    Kube {
        operation: &'static str,
        #[source]
        source: kube::Error,
    },
    #[error("finalization of {name} failed: {reason}")]
    Finalization { name: String, reason: String },
}

impl ReconcilerError {
    pub(crate) fn kube(operation: &'static str) -> impl FnOnce(kube::Error) -> Self {
        move |source| ReconcilerError::Kube { operation, source }
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub fetcher: SourceFetcher,
    pub orchestrator: JobOrchestrator,
    pub events: Arc<dyn EventPublisher>,
    // Backoff state per run (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, config: SharedControllerConfig) -> Self {
        let fetcher = SourceFetcher::new(
            Arc::new(GitCli::new(config.git_binary.clone())),
            Arc::new(KubeSecretStore::new(client.clone())),
            config.ssh_binary.clone(),
            config.work_dir.clone(),
            config.tunnel_startup_timeout(),
        );
        Self {
            orchestrator: JobOrchestrator::new(client.clone()),
            events: Arc::new(KubeEventPublisher::new(
                client.clone(),
                crate::constants::CONTROLLER_NAME,
            )),
            fetcher,
            config,
            client,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn resource_key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    /// Record a failed pass; returns the retry delay and the consecutive error count
    pub fn record_error(&self, key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| {
                    BackoffState::new(
                        self.config.error_backoff_min_minutes,
                        self.config.error_backoff_max_minutes,
                    )
                });
                let delay = state.record_error();
                (delay, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Clear the error history of a run; returns whether it had any
    pub fn reset_backoff(&self, key: &str) -> bool {
        let Ok(mut states) = self.backoff_states.lock() else {
            return false;
        };
        states.remove(key).is_some_and(|s| s.error_count > 0)
    }

    /// Whether the run hit the consecutive failure cap
    pub fn errors_exhausted(&self, key: &str) -> bool {
        self.backoff_states.lock().is_ok_and(|states| {
            states
                .get(key)
                .is_some_and(|s| s.exhausted(self.config.max_consecutive_errors))
        })
    }
}
