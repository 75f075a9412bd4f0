//! Quality statistics aggregation
//!
//! Pure functions over a record-store snapshot: overall metrics,
//! per-vendor and per-lot rollups, and quality tiers. No mutation, no
//! I/O; safe to call repeatedly while a batch scan is in progress.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use markscan_common::InspectionRecord;

/// Number of lots reported in the top-lot rollup
const TOP_LOTS: usize = 10;

/// Coarse quality label derived from a pass rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    /// Classify a pass rate (percentage). Boundaries are inclusive on
    /// the lower bound of each tier: 95 / 85 / 70.
    pub fn from_pass_rate(rate: f64) -> Self {
        if rate >= 95.0 {
            QualityTier::Excellent
        } else if rate >= 85.0 {
            QualityTier::Good
        } else if rate >= 70.0 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Fair => "Fair",
            QualityTier::Poor => "Poor",
        }
    }
}

/// Overall metrics for the whole record set
#[derive(Debug, Clone, Serialize)]
pub struct OverallStats {
    pub total: usize,
    /// pass + overridden
    pub passed: usize,
    pub failed: usize,
    /// Percentage in [0, 100]; 0 for an empty set
    pub pass_rate: f64,
    /// Mean confidence as a percentage; 0 for an empty set
    pub avg_confidence: f64,
}

/// Per-vendor rollup
#[derive(Debug, Clone, Serialize)]
pub struct VendorStats {
    pub vendor: String,
    pub total_scanned: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub avg_confidence: f64,
    pub distinct_lots: usize,
    pub tier: QualityTier,
}

/// Per-lot rollup, keyed by (vendor, lot_id)
#[derive(Debug, Clone, Serialize)]
pub struct LotStats {
    pub vendor: String,
    pub lot_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub tier: QualityTier,
}

/// Complete aggregation report
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub overall: OverallStats,
    /// Sorted by total_scanned descending, ties in encounter order
    pub vendors: Vec<VendorStats>,
    /// Top lots by total descending, ties in encounter order
    pub top_lots: Vec<LotStats>,
}

/// Build the full quality report from a snapshot.
///
/// Order-independent over the record set apart from tie-breaking, which
/// preserves encounter order (stable sorts throughout).
pub fn build_report(records: &[InspectionRecord]) -> QualityReport {
    QualityReport {
        overall: overall_stats(records),
        vendors: vendor_stats(records),
        top_lots: lot_stats(records),
    }
}

fn overall_stats(records: &[InspectionRecord]) -> OverallStats {
    let total = records.len();
    let passed = records.iter().filter(|r| r.result.counts_as_pass()).count();
    let failed = total - passed;

    let (pass_rate, avg_confidence) = if total > 0 {
        let confidence_sum: f64 = records.iter().map(|r| r.confidence).sum();
        (
            passed as f64 / total as f64 * 100.0,
            confidence_sum / total as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    OverallStats {
        total,
        passed,
        failed,
        pass_rate,
        avg_confidence,
    }
}

/// Accumulator shared by the vendor and lot rollups
#[derive(Default)]
struct Tally {
    total: usize,
    passed: usize,
    confidence_sum: f64,
    lots: HashSet<String>,
}

impl Tally {
    fn add(&mut self, record: &InspectionRecord) {
        self.total += 1;
        if record.result.counts_as_pass() {
            self.passed += 1;
        }
        self.confidence_sum += record.confidence;
        self.lots.insert(record.lot_id.clone());
    }

    fn pass_rate(&self) -> f64 {
        if self.total > 0 {
            self.passed as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }
}

fn vendor_stats(records: &[InspectionRecord]) -> Vec<VendorStats> {
    // Encounter order of vendors is preserved; the index map only
    // locates the tally.
    let mut order: Vec<String> = Vec::new();
    let mut tallies: HashMap<String, Tally> = HashMap::new();

    for record in records {
        if !tallies.contains_key(&record.vendor) {
            order.push(record.vendor.clone());
        }
        tallies.entry(record.vendor.clone()).or_default().add(record);
    }

    let mut stats: Vec<VendorStats> = order
        .into_iter()
        .map(|vendor| {
            let tally = &tallies[&vendor];
            let pass_rate = tally.pass_rate();
            VendorStats {
                total_scanned: tally.total,
                passed: tally.passed,
                failed: tally.total - tally.passed,
                pass_rate,
                avg_confidence: tally.confidence_sum / tally.total as f64 * 100.0,
                distinct_lots: tally.lots.len(),
                tier: QualityTier::from_pass_rate(pass_rate),
                vendor,
            }
        })
        .collect();

    // sort_by is stable: equal totals keep encounter order.
    stats.sort_by(|a, b| b.total_scanned.cmp(&a.total_scanned));
    stats
}

fn lot_stats(records: &[InspectionRecord]) -> Vec<LotStats> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut tallies: HashMap<(String, String), Tally> = HashMap::new();

    for record in records {
        let key = (record.vendor.clone(), record.lot_id.clone());
        if !tallies.contains_key(&key) {
            order.push(key.clone());
        }
        tallies.entry(key).or_default().add(record);
    }

    let mut stats: Vec<LotStats> = order
        .into_iter()
        .map(|(vendor, lot_id)| {
            let tally = &tallies[&(vendor.clone(), lot_id.clone())];
            let pass_rate = tally.pass_rate();
            LotStats {
                vendor,
                lot_id,
                total: tally.total,
                passed: tally.passed,
                failed: tally.total - tally.passed,
                pass_rate,
                tier: QualityTier::from_pass_rate(pass_rate),
            }
        })
        .collect();

    stats.sort_by(|a, b| b.total.cmp(&a.total));
    stats.truncate(TOP_LOTS);
    stats
}
