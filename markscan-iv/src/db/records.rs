//! Inspection record store
//!
//! Append-only collection of inspection records, listed newest first.
//! The single permitted mutation is the fail -> overridden transition.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use markscan_common::{Error, InspectionRecord, Result, ScanResult};

/// Append a record to the store.
///
/// Record ids must be unique; a duplicate id is rejected as invalid
/// input rather than silently replaced.
pub async fn append_record(pool: &SqlitePool, record: &InspectionRecord) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO inspection_records
            (guid, vendor, lot_id, part_number, result, confidence, operator, image_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.vendor)
    .bind(&record.lot_id)
    .bind(&record.part_number)
    .bind(record.result.as_str())
    .bind(record.confidence)
    .bind(&record.operator)
    .bind(&record.image_ref)
    .bind(record.created_at.to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::InvalidInput(
            format!("Record id already exists: {}", record.id),
        )),
        Err(e) => Err(Error::Database(e)),
    }
}

/// List the current snapshot of all records, most recent first.
///
/// Rowid breaks ties between records created within the same timestamp
/// granularity, so insertion order is preserved.
pub async fn list_records(pool: &SqlitePool) -> Result<Vec<InspectionRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, vendor, lot_id, part_number, result, confidence, operator, image_ref, created_at
        FROM inspection_records
        ORDER BY created_at DESC, rowid DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Fetch one record by id
pub async fn get_record(pool: &SqlitePool, id: Uuid) -> Result<Option<InspectionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT guid, vendor, lot_id, part_number, result, confidence, operator, image_ref, created_at
        FROM inspection_records
        WHERE guid = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Transition a record's result from fail to overridden.
///
/// Returns the record's result after the call. NotFound if the id does
/// not exist; a record whose result is not currently `fail` is left
/// untouched (no-op, not an error) to guard against double-approval.
pub async fn set_overridden(pool: &SqlitePool, id: Uuid) -> Result<ScanResult> {
    let current = get_record(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Inspection record not found: {}", id)))?;

    if current.result != ScanResult::Fail {
        tracing::debug!(record_id = %id, result = %current.result, "Override skipped, record is not fail");
        return Ok(current.result);
    }

    sqlx::query("UPDATE inspection_records SET result = ? WHERE guid = ? AND result = ?")
        .bind(ScanResult::Overridden.as_str())
        .bind(id.to_string())
        .bind(ScanResult::Fail.as_str())
        .execute(pool)
        .await?;

    tracing::info!(record_id = %id, "Record overridden");
    Ok(ScanResult::Overridden)
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<InspectionRecord> {
    let guid: String = row.get("guid");
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::Internal(format!("Invalid record guid {}: {}", guid, e)))?;

    let result: String = row.get("result");
    let result = ScanResult::parse(&result)?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Invalid created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(InspectionRecord {
        id,
        vendor: row.get("vendor"),
        lot_id: row.get("lot_id"),
        part_number: row.get("part_number"),
        result,
        confidence: row.get("confidence"),
        operator: row.get("operator"),
        image_ref: row.get("image_ref"),
        created_at,
    })
}
