//! Server events.
//!
//! Power actions, registrations and BMC updates are published as
//! Kubernetes events on the Server. Publishing is best effort; a failed
//! publish is logged and otherwise ignored.

use crds::Server;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{debug, warn};

pub const REASON_SERVER_MANAGEMENT: &str = "Server Management";
pub const REASON_SERVER_ALLOCATION: &str = "Server Allocation";
pub const REASON_SERVER_REGISTRATION: &str = "Server Registration";
pub const REASON_SERVER_WIPE: &str = "Server Wipe";
pub const REASON_BMC_UPDATE: &str = "BMC Update";

const REPORTER: &str = "metal-controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// An event about one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub severity: Severity,
    pub reason: &'static str,
    pub note: String,
}

impl ServerEvent {
    pub fn normal(reason: &'static str, note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Normal,
            reason,
            note: note.into(),
        }
    }

    pub fn warning(reason: &'static str, note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            reason,
            note: note.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, server: &Server, event: ServerEvent);
}

/// Publishes events through the Kubernetes events API.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, server: &Server, event: ServerEvent) {
        let ev = Event {
            type_: match event.severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: event.reason.to_string(),
            note: Some(event.note.clone()),
            action: event.reason.to_string(),
            secondary: None,
        };

        let reference = server.object_ref(&());
        match self.recorder.publish(&ev, &reference).await {
            Ok(()) => debug!(reason = event.reason, note = %event.note, "published event"),
            Err(e) => warn!(reason = event.reason, error = %e, "failed to publish event"),
        }
    }
}
