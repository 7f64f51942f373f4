//! Sync status events
//!
//! The engine emits structured status events; dashboards subscribe through
//! the EventBus (and the SSE endpoint built on top of it). Rendering is not
//! this crate's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Machine-checkable status of a sync (per source or per run)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    /// Run-level only: at least one source failed, at least one succeeded
    PartialSuccess,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::PartialSuccess => "partial_success",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SyncStatus::Pending),
            "in_progress" => Some(SyncStatus::InProgress),
            "success" => Some(SyncStatus::Success),
            "partial_success" => Some(SyncStatus::PartialSuccess),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Success | SyncStatus::PartialSuccess | SyncStatus::Error
        )
    }
}

/// mdash event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// One source of a project changed status
    SourceStatusChanged {
        project_id: Uuid,
        source: String,
        status: SyncStatus,
        /// Current orchestration phase (fetching, normalizing, ...)
        phase: String,
        /// Human-readable message, already redacted
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A sync run across all configured sources finished
    SyncFinished {
        project_id: Uuid,
        run_id: Uuid,
        status: SyncStatus,
        trigger: String,
        rows_written: usize,
        failed_sources: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Storage mode of a project changed
    ModeSwitched {
        project_id: Uuid,
        previous_mode: String,
        new_mode: String,
        records_converted: usize,
        backup_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SourceStatusChanged { .. } => "SourceStatusChanged",
            SyncEvent::SyncFinished { .. } => "SyncFinished",
            SyncEvent::ModeSwitched { .. } => "ModeSwitched",
        }
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            SyncEvent::SourceStatusChanged { project_id, .. }
            | SyncEvent::SyncFinished { project_id, .. }
            | SyncEvent::ModeSwitched { project_id, .. } => *project_id,
        }
    }
}

/// Broadcast bus for SyncEvents
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per slow subscriber
    ///
    /// ```
    /// use mdash_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, failing if nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Status updates are advisory; a missing dashboard must not fail a sync.
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::InProgress,
            SyncStatus::Success,
            SyncStatus::PartialSuccess,
            SyncStatus::Error,
        ] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("running"), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SyncStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let project_id = Uuid::new_v4();
        bus.emit_lossy(SyncEvent::SourceStatusChanged {
            project_id,
            source: "ads".to_string(),
            status: SyncStatus::InProgress,
            phase: "fetching".to_string(),
            message: None,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "SourceStatusChanged");
        assert_eq!(event.project_id(), project_id);
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(10);
        let result = bus.emit(SyncEvent::ModeSwitched {
            project_id: Uuid::new_v4(),
            previous_mode: "daily_aggregate".to_string(),
            new_mode: "individual_records".to_string(),
            records_converted: 0,
            backup_id: None,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }
}
