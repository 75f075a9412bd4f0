//! Flagged components queue
//!
//! Derived view of the record store: every record with a fail verdict,
//! filterable by substring, plus the approve/reject operator actions.

use sqlx::SqlitePool;
use uuid::Uuid;

use markscan_common::{InspectionRecord, Result, ScanResult};

use crate::db::records;

/// Filter a snapshot down to the flagged (fail) records.
///
/// The optional query matches case-insensitively against part_number,
/// lot_id, or vendor.
pub fn flagged_view<'a>(
    records: &'a [InspectionRecord],
    query: Option<&str>,
) -> Vec<&'a InspectionRecord> {
    let needle = query.map(str::to_lowercase);

    records
        .iter()
        .filter(|r| r.result == ScanResult::Fail)
        .filter(|r| match &needle {
            Some(q) => {
                r.part_number.to_lowercase().contains(q)
                    || r.lot_id.to_lowercase().contains(q)
                    || r.vendor.to_lowercase().contains(q)
            }
            None => true,
        })
        .collect()
}

/// Approve a flagged record: overrides its fail verdict.
///
/// After approval the record leaves the fail-filtered view and renders
/// as overridden everywhere.
pub async fn approve(pool: &SqlitePool, id: Uuid) -> Result<ScanResult> {
    records::set_overridden(pool, id).await
}

/// Reject (confirm) a flagged record's fail verdict.
///
/// Deliberately performs no store mutation: the fail verdict stands as
/// recorded. Only verifies the record exists so a stale id surfaces as
/// NotFound rather than silently succeeding.
pub async fn reject(pool: &SqlitePool, id: Uuid) -> Result<ScanResult> {
    let record = records::get_record(pool, id)
        .await?
        .ok_or_else(|| markscan_common::Error::NotFound(format!(
            "Inspection record not found: {}",
            id
        )))?;

    tracing::info!(record_id = %id, "Fail verdict confirmed, no state change");
    Ok(record.result)
}
