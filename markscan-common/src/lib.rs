//! # MarkScan Common Library
//!
//! Shared code for MarkScan services including:
//! - Inspection data model (InspectionRecord, Lot)
//! - Event types (MarkScanEvent enum) and EventBus
//! - Error types
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use models::{InspectionRecord, Lot, ScanImage, ScanResult};
