//! Scan API handlers
//!
//! POST /scan/lot (batch), /scan/cancel/{id}, /scan/manual,
//! /scan/manual/commit

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use markscan_common::{InspectionRecord, Lot, ScanImage, ScanResult};

use crate::error::{ApiError, ApiResult};
use crate::models::{ScanSession, ScanState};
use crate::services::ScanOrchestrator;
use crate::AppState;

/// POST /scan/lot response
#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub session_id: Uuid,
    pub state: ScanState,
    pub total_images: usize,
}

/// POST /scan/cancel/{session_id} response
#[derive(Debug, Serialize)]
pub struct CancelScanResponse {
    pub session_id: Uuid,
    pub cancelled: bool,
}

/// POST /scan/manual response: the classifier's verdict, held pending
/// until the operator commits a decision.
#[derive(Debug, Serialize)]
pub struct ManualScanResponse {
    pub result: ScanResult,
    pub confidence: f64,
    pub image_ref: Option<String>,
}

/// POST /scan/manual/commit request
#[derive(Debug, Deserialize)]
pub struct CommitManualRequest {
    /// "pass" or "fail" - the operator's decision, which may disagree
    /// with the classifier's verdict
    pub decision: ScanResult,
}

fn orchestrator(state: &AppState) -> ScanOrchestrator<crate::services::ClassifierClient> {
    ScanOrchestrator::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.classifier.clone(),
        state.uploads_dir.clone(),
        state.pacing,
    )
}

/// Parse a lot out of a multipart form: text fields `vendor`, `lotId`,
/// `partNumber` plus one or more `images` file parts.
async fn lot_from_multipart(mut multipart: Multipart) -> ApiResult<Lot> {
    let mut vendor = String::new();
    let mut lot_id = String::new();
    let mut part_number = String::new();
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "vendor" => {
                vendor = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
            }
            "lotId" => {
                lot_id = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
            }
            "partNumber" => {
                part_number = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
            }
            "images" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image-{}.bin", images.len()));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
                    .to_vec();
                images.push(ScanImage { file_name, data });
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(Lot {
        vendor,
        lot_id,
        part_number,
        images,
    })
}

/// POST /scan/lot
///
/// Start a batch scan over an uploaded lot. Returns 202 Accepted with
/// the session id; progress streams over /events. 409 if a batch is
/// already running (single-writer store, one run at a time).
pub async fn start_lot_scan(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StartScanResponse>)> {
    let lot = lot_from_multipart(multipart).await?;
    lot.validate().map_err(ApiError::from)?;

    let session = ScanSession::new(&lot);
    let session_id = session.session_id;
    let total_images = lot.images.len();
    let token = CancellationToken::new();

    // Check-and-insert under one write lock; two concurrent requests
    // must never both pass the emptiness check.
    {
        let mut active = state.active_scans.write().await;
        if !active.is_empty() {
            return Err(ApiError::Conflict("Batch scan already running".to_string()));
        }
        active.insert(session_id, token.clone());
    }

    tracing::info!(
        session_id = %session_id,
        vendor = %lot.vendor,
        lot_id = %lot.lot_id,
        total_images = total_images,
        "Batch scan accepted"
    );

    let task_state = state.clone();
    tokio::spawn(async move {
        let orch = orchestrator(&task_state);
        if let Err(e) = orch.run_lot(lot, session, token).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Batch scan task failed"
            );
            task_state
                .event_bus
                .emit_lossy(markscan_common::events::MarkScanEvent::ScanSessionFailed {
                    session_id,
                    error: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
        }
        task_state.active_scans.write().await.remove(&session_id);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            session_id,
            state: ScanState::Running,
            total_images,
        }),
    ))
}

/// POST /scan/cancel/{session_id}
///
/// Cancel a running batch scan; takes effect before the next image's
/// classification call.
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelScanResponse>> {
    let active = state.active_scans.read().await;
    let token = active
        .get(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("No active scan session: {}", session_id)))?;

    token.cancel();
    tracing::info!(session_id = %session_id, "Cancellation requested");

    Ok(Json(CancelScanResponse {
        session_id,
        cancelled: true,
    }))
}

/// POST /scan/manual
///
/// Classify a single manually uploaded image. The verdict is held
/// pending - no record is written until /scan/manual/commit. 409 while
/// another manual scan is in flight.
pub async fn manual_scan(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ManualScanResponse>> {
    let mut image: Option<ScanImage> = None;
    let mut operator = "Manual".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "manual-scan.bin".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
                    .to_vec();
                image = Some(ScanImage { file_name, data });
            }
            "operator" => {
                operator = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
            }
            _ => {}
        }
    }

    // One manual scan at a time; the flag is cleared on every exit path.
    if state
        .manual_in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ApiError::Conflict(
            "Manual scan already in progress".to_string(),
        ));
    }

    let result = orchestrator(&state).manual_classify(image, &operator).await;
    state.manual_in_flight.store(false, Ordering::SeqCst);

    let pending = result.map_err(ApiError::from)?;
    let response = ManualScanResponse {
        result: pending.verdict.result,
        confidence: pending.verdict.confidence,
        image_ref: pending.image_ref.clone(),
    };

    *state.pending_manual.write().await = Some(pending);

    Ok(Json(response))
}

/// POST /scan/manual/commit
///
/// Commit the pending manual verdict with the operator's decision.
/// Exactly one record is created; the pending verdict is consumed.
pub async fn commit_manual_scan(
    State(state): State<AppState>,
    Json(request): Json<CommitManualRequest>,
) -> ApiResult<Json<InspectionRecord>> {
    let pending = state
        .pending_manual
        .write()
        .await
        .take()
        .ok_or_else(|| ApiError::BadRequest("No pending manual scan to commit".to_string()))?;

    let record = orchestrator(&state)
        .commit_manual(pending, request.decision)
        .await?;

    Ok(Json(record))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scan/lot", post(start_lot_scan))
        .route("/scan/cancel/:session_id", post(cancel_scan))
        .route("/scan/manual", post(manual_scan))
        .route("/scan/manual/commit", post(commit_manual_scan))
}
