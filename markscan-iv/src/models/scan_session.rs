//! Batch scan run state machine
//!
//! One ScanSession tracks one lot's scan run:
//! IDLE -> RUNNING -> {COMPLETED, CANCELLED, FAILED}.
//! RUNNING is entered exactly once per session, which guards against
//! spurious re-triggers restarting an in-flight lot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use markscan_common::{Error, Lot, Result};

/// Batch scan run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanState {
    /// Session created, run not started
    Idle,
    /// Sequentially processing the lot's images
    Running,
    /// All images processed (including fallback records)
    Completed,
    /// Run cancelled before the last image
    Cancelled,
    /// Run aborted with an unrecoverable error
    Failed,
}

impl ScanState {
    /// Terminal states end the session; ended_at is set on entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Cancelled | ScanState::Failed
        )
    }
}

/// Progress through one batch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Images processed so far
    pub current: usize,
    /// Total images in the lot
    pub total: usize,
    /// Percentage complete (0.0 - 100.0), non-decreasing within a run
    pub percentage: f64,
}

/// One batch scan run over a single lot (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    /// Unique session identifier
    pub session_id: Uuid,
    /// Current run state
    pub state: ScanState,
    /// Lot metadata (the image payloads live in the Lot itself)
    pub vendor: String,
    pub lot_id: String,
    pub part_number: String,
    /// Progress tracking
    pub progress: ScanProgress,
    /// Session creation time
    pub started_at: DateTime<Utc>,
    /// Session end time (set on entering a terminal state)
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    /// Create a new idle session for a lot
    pub fn new(lot: &Lot) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: ScanState::Idle,
            vendor: lot.vendor.clone(),
            lot_id: lot.lot_id.clone(),
            part_number: lot.part_number.clone(),
            progress: ScanProgress {
                current: 0,
                total: lot.images.len(),
                percentage: 0.0,
            },
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Enter the Running state.
    ///
    /// Fails unless the session is Idle - each session runs at most once.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ScanState::Idle {
            return Err(Error::InvalidInput(format!(
                "Scan session {} already started (state: {:?})",
                self.session_id, self.state
            )));
        }
        self.state = ScanState::Running;
        self.progress.percentage = 0.0;
        self.progress.current = 0;
        Ok(())
    }

    /// Transition to a new state, recording the end time for terminal states
    pub fn transition_to(&mut self, new_state: ScanState) {
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    /// Update progress after an image has been processed.
    ///
    /// Percentage never decreases within a run.
    pub fn update_progress(&mut self, current: usize) {
        self.progress.current = current;
        let pct = if self.progress.total > 0 {
            (current as f64 / self.progress.total as f64) * 100.0
        } else {
            0.0
        };
        if pct > self.progress.percentage {
            self.progress.percentage = pct;
        }
    }
}
