use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::crd::CloudFormationStack;

pub const ACTION_RECONCILE: &str = "Reconcile";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackEvent {
    pub kind: EventKind,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
}

impl StackEvent {
    pub fn info(reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            severity: Severity::Info,
            reason: reason.to_string(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            severity: Severity::Error,
            reason: reason.to_string(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Message followed by `key=value` metadata.
    pub fn note(&self) -> String {
        let mut note = self.message.clone();
        for (k, v) in &self.metadata {
            note.push_str(&format!(" {k}={v}"));
        }
        note
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, obj: &CloudFormationStack, event: StackEvent);
}

/// Publishes events through the API server.
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn emit(&self, obj: &CloudFormationStack, event: StackEvent) {
        let note = event.note();
        match event.severity {
            Severity::Info => info!(reason = %event.reason, %note, "event"),
            Severity::Error => warn!(reason = %event.reason, %note, "event"),
        }
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        if let Err(e) = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: Some(note),
                    action: ACTION_RECONCILE.into(),
                    secondary: None,
                },
                &obj.object_ref(&()),
            )
            .await
        {
            error!(error = %e, reason = %event.reason, "failed to publish event");
        }
    }
}

/// Keeps emitted events for inspection.
#[derive(Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<RwLock<Vec<StackEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<StackEvent> {
        self.events.read().await.clone()
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, _obj: &CloudFormationStack, event: StackEvent) {
        self.events.write().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_appends_sorted_metadata() {
        let ev = StackEvent::warning("ChangeSetFailed", "Change set failed")
            .with("revision", "main@sha1:abc")
            .with("changeSet", "flux-1-main-sha1-abc");
        assert_eq!(
            ev.note(),
            "Change set failed changeSet=flux-1-main-sha1-abc revision=main@sha1:abc"
        );
        assert_eq!(ev.severity, Severity::Error);
        assert_eq!(ev.kind, EventKind::Warning);
    }
}
