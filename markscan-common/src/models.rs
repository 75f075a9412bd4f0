//! Inspection data model shared across MarkScan services
//!
//! `InspectionRecord` is the durable verdict entity; `Lot` is the ephemeral
//! batch descriptor consumed by a single scan run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Operator identity recorded for automated batch scans
pub const OPERATOR_AUTO: &str = "System Auto";

/// Sentinel vendor for manual (single-image) scans
pub const MANUAL_VENDOR: &str = "Manual";

/// Sentinel lot/part identifier for manual scans
pub const MANUAL_SENTINEL: &str = "N/A";

/// Verdict of one inspection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanResult {
    /// Marking verified as authentic
    Pass,
    /// Marking flagged as counterfeit (or unverifiable)
    Fail,
    /// Fail verdict overridden by an operator in the flagged queue
    Overridden,
}

impl ScanResult {
    /// Database / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanResult::Pass => "pass",
            ScanResult::Fail => "fail",
            ScanResult::Overridden => "overridden",
        }
    }

    /// Parse from database / wire representation
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pass" => Ok(ScanResult::Pass),
            "fail" => Ok(ScanResult::Fail),
            "overridden" => Ok(ScanResult::Overridden),
            other => Err(Error::Internal(format!("Unknown scan result: {}", other))),
        }
    }

    /// Whether this verdict counts toward the pass side of quality metrics.
    ///
    /// Overridden records were approved by an operator and count as passed.
    pub fn counts_as_pass(&self) -> bool {
        matches!(self, ScanResult::Pass | ScanResult::Overridden)
    }
}

impl std::fmt::Display for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable inspection verdict
///
/// Immutable once created, except for the single permitted transition
/// fail -> overridden performed through the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionRecord {
    /// Unique record identifier, assigned at creation
    pub id: Uuid,
    /// Vendor the component was sourced from
    pub vendor: String,
    /// Lot grouping identifier ("N/A" for manual scans)
    pub lot_id: String,
    /// Expected marking identifier
    pub part_number: String,
    /// Verdict
    pub result: ScanResult,
    /// Detection confidence in [0, 1]; 0 when classification failed
    pub confidence: f64,
    /// Who or what submitted the scan
    pub operator: String,
    /// Transient display reference for the scanned image, if one was stored
    pub image_ref: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl InspectionRecord {
    /// Create a record with a fresh id and timestamp.
    ///
    /// Confidence is clamped into [0, 1]; the classifier is trusted to
    /// normalize but the invariant is enforced here.
    pub fn new(
        vendor: impl Into<String>,
        lot_id: impl Into<String>,
        part_number: impl Into<String>,
        result: ScanResult,
        confidence: f64,
        operator: impl Into<String>,
        image_ref: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor: vendor.into(),
            lot_id: lot_id.into(),
            part_number: part_number.into(),
            result,
            confidence: confidence.clamp(0.0, 1.0),
            operator: operator.into(),
            image_ref,
            created_at: Utc::now(),
        }
    }

    /// Fallback record for an image whose classification could not be
    /// completed: unverified components are treated as failed.
    pub fn fallback(
        vendor: impl Into<String>,
        lot_id: impl Into<String>,
        part_number: impl Into<String>,
        operator: impl Into<String>,
        image_ref: Option<String>,
    ) -> Self {
        Self::new(
            vendor,
            lot_id,
            part_number,
            ScanResult::Fail,
            0.0,
            operator,
            image_ref,
        )
    }
}

/// One source image submitted for scanning
#[derive(Debug, Clone)]
pub struct ScanImage {
    /// Original file name, used for the stored display copy
    pub file_name: String,
    /// Raw image bytes as uploaded
    pub data: Vec<u8>,
}

/// A named batch of component images scanned together.
///
/// Ephemeral: owned by one orchestrator run and discarded afterwards.
#[derive(Debug, Clone)]
pub struct Lot {
    pub vendor: String,
    pub lot_id: String,
    pub part_number: String,
    pub images: Vec<ScanImage>,
}

impl Lot {
    /// Validate lot metadata before any network call is made
    pub fn validate(&self) -> Result<()> {
        if self.vendor.trim().is_empty() {
            return Err(Error::InvalidInput("Lot vendor must not be empty".into()));
        }
        if self.lot_id.trim().is_empty() {
            return Err(Error::InvalidInput("Lot id must not be empty".into()));
        }
        if self.part_number.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Lot part number must not be empty".into(),
            ));
        }
        if self.images.is_empty() {
            return Err(Error::InvalidInput(
                "Lot must contain at least one image".into(),
            ));
        }
        Ok(())
    }
}
