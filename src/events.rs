//! Event Bus
//!
//! Notifications surfaced to the hosting application (UI, CLI): status
//! lines, transfer progress, file-list changes, and computed sync plans.
//! Sync and download engines never raise failures to their callers'
//! threads; they downgrade them to `Status` events on this bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::node::NodeRole;

/// Severity of a status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A notification emitted by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A meaningful state change, with a human-readable message
    Status {
        role: NodeRole,
        replica_id: Option<u32>,
        kind: StatusKind,
        message: String,
    },
    /// Sampled progress of one in-flight transfer
    TransferProgress {
        filename: String,
        percent: u8,
        bytes_per_sec: u64,
    },
    /// A node's file set changed (write, delete, or sync completion)
    FileListChanged {
        role: NodeRole,
        replica_id: Option<u32>,
    },
    /// A pull-sync run computed its plan
    SyncPlanReady {
        replica_id: u32,
        downloads: Vec<String>,
        deletes: Vec<String>,
    },
}

/// Broadcast bus carrying [`Event`]s to any number of subscribers.
///
/// Cheap to clone; emitting with no live subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Emit a status notification
    pub fn status(
        &self,
        role: NodeRole,
        replica_id: Option<u32>,
        kind: StatusKind,
        message: impl Into<String>,
    ) {
        self.emit(Event::Status {
            role,
            replica_id,
            kind,
            message: message.into(),
        });
    }

    /// Emit a file-list-changed notification
    pub fn file_list_changed(&self, role: NodeRole, replica_id: Option<u32>) {
        self.emit(Event::FileListChanged { role, replica_id });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.status(NodeRole::Primary, None, StatusKind::Info, "started");

        match rx.recv().await.unwrap() {
            Event::Status { role, kind, message, .. } => {
                assert_eq!(role, NodeRole::Primary);
                assert_eq!(kind, StatusKind::Info);
                assert_eq!(message, "started");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.file_list_changed(NodeRole::Replica, Some(1));
    }
}
