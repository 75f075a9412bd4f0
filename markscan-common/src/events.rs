//! Event types for the MarkScan event system
//!
//! Provides the shared `MarkScanEvent` enum and `EventBus` used to push
//! scan progress and committed records to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::InspectionRecord;

/// MarkScan event types
///
/// Events are broadcast via the EventBus and serialized for SSE
/// transmission. One central enum keeps matching exhaustive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarkScanEvent {
    /// A batch scan run started
    ScanSessionStarted {
        session_id: Uuid,
        vendor: String,
        lot_id: String,
        total_images: usize,
        timestamp: DateTime<Utc>,
    },

    /// Progress within a running batch scan
    ///
    /// Percentage is in [0, 100] and non-decreasing within one run;
    /// it resets to 0 when a new run starts.
    ScanProgress {
        session_id: Uuid,
        current: usize,
        total: usize,
        percentage: f64,
        timestamp: DateTime<Utc>,
    },

    /// An inspection record was committed to the store.
    ///
    /// Fired exactly once per committed record, for both batch and
    /// manual scans. Carries the full record.
    RecordAdded {
        record: InspectionRecord,
        timestamp: DateTime<Utc>,
    },

    /// A batch scan run finished processing its last image
    ScanSessionCompleted {
        session_id: Uuid,
        records_created: usize,
        fallbacks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch scan run was cancelled before completion
    ScanSessionCancelled {
        session_id: Uuid,
        images_processed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch scan run aborted with an unrecoverable error
    ScanSessionFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl MarkScanEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            MarkScanEvent::ScanSessionStarted { .. } => "ScanSessionStarted",
            MarkScanEvent::ScanProgress { .. } => "ScanProgress",
            MarkScanEvent::RecordAdded { .. } => "RecordAdded",
            MarkScanEvent::ScanSessionCompleted { .. } => "ScanSessionCompleted",
            MarkScanEvent::ScanSessionCancelled { .. } => "ScanSessionCancelled",
            MarkScanEvent::ScanSessionFailed { .. } => "ScanSessionFailed",
        }
    }
}

/// Broadcast bus for MarkScan events
///
/// Thin wrapper over `tokio::sync::broadcast`; cloning shares the
/// underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MarkScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    ///
    /// Old events are dropped for lagging subscribers once the buffer
    /// fills; 100 is plenty for a single sequential scan run.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MarkScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening.
    ///
    /// Progress and record events are advisory for the display layer;
    /// nobody listening is not an error.
    pub fn emit_lossy(&self, event: MarkScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
