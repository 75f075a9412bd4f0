//! Service layer for markscan-iv

pub mod classifier;
pub mod flagged_queue;
pub mod orchestrator;

pub use classifier::{Classify, ClassifierClient, ClassifierError};
pub use orchestrator::{PendingVerdict, ScanOrchestrator, DEFAULT_PACING_MS};
