//! Record store and flagged queue API handlers

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use markscan_common::{InspectionRecord, ScanResult};

use crate::error::ApiResult;
use crate::services::flagged_queue;
use crate::AppState;

/// GET /records/flagged query parameters
#[derive(Debug, Deserialize)]
pub struct FlaggedQuery {
    /// Case-insensitive substring matched against
    /// part_number / lot_id / vendor
    pub q: Option<String>,
}

/// Response for the override/confirm actions
#[derive(Debug, Serialize)]
pub struct RecordActionResponse {
    pub id: Uuid,
    pub result: ScanResult,
}

/// GET /records
///
/// Full snapshot of the record store, most recent first.
pub async fn list_records(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<InspectionRecord>>> {
    let records = crate::db::records::list_records(&state.db).await?;
    Ok(Json(records))
}

/// GET /records/flagged
///
/// Fail-filtered projection of the store, optionally filtered by `q`.
pub async fn list_flagged(
    State(state): State<AppState>,
    Query(query): Query<FlaggedQuery>,
) -> ApiResult<Json<Vec<InspectionRecord>>> {
    let snapshot = crate::db::records::list_records(&state.db).await?;
    let view: Vec<InspectionRecord> = flagged_queue::flagged_view(&snapshot, query.q.as_deref())
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(view))
}

/// POST /records/{id}/override
///
/// Approve a flagged record: fail -> overridden. Idempotent; 404 if the
/// id is unknown.
pub async fn override_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RecordActionResponse>> {
    let result = flagged_queue::approve(&state.db, id).await?;
    Ok(Json(RecordActionResponse { id, result }))
}

/// POST /records/{id}/confirm
///
/// Reject (confirm) a flagged record's fail verdict. No store mutation.
pub async fn confirm_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RecordActionResponse>> {
    let result = flagged_queue::reject(&state.db, id).await?;
    Ok(Json(RecordActionResponse { id, result }))
}

/// Build record routes
pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/records", get(list_records))
        .route("/records/flagged", get(list_flagged))
        .route("/records/:id/override", post(override_record))
        .route("/records/:id/confirm", post(confirm_record))
}
