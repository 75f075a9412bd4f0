//! Domain models for markscan-iv

mod scan_session;

pub use scan_session::{ScanProgress, ScanSession, ScanState};
