//! # Kubernetes Events
//!
//! Events on `Terraform` resources, visible with `kubectl describe tf`.
//!
//! Publishing is fire-and-forget: a failure is logged and never breaks
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Keeps `(reason, note)` of every event, for tests
#[derive(Default)]
pub struct RecordingEventPublisher {
    pub events: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push((reason.to_string(), note));
        }
    }
}

/// Event reasons (REASON column)
pub mod reasons {
    /// Any failed reconciliation pass
    pub const PROCESSING_ERROR: &str = "ProcessingError";
    pub const JOB_SUBMITTED: &str = "JobSubmitted";
    pub const JOB_RESTARTED: &str = "JobRestarted";
    pub const JOB_FAILED: &str = "JobFailed";
    /// Expired runner pods that could not be deleted
    pub const POD_PRUNE_FAILED: &str = "PodPruneFailed";
    pub const DESTROY_STARTED: &str = "DestroyStarted";
    pub const DESTROY_FINISHED: &str = "DestroyFinished";
}

/// Event actions (ACTION column)
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const SUBMIT: &str = "Submit";
    pub const FINALIZE: &str = "Finalize";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publishers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
        assert_send_sync::<RecordingEventPublisher>();
    }

    #[tokio::test]
    async fn test_recording_publisher_keeps_reason_and_note() {
        let publisher = RecordingEventPublisher::default();
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::PROCESSING_ERROR,
                actions::RECONCILE,
                Some("fetch failed".to_string()),
            )
            .await;
        let events = publisher.events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            [("ProcessingError".to_string(), Some("fetch failed".to_string()))]
        );
    }
}
