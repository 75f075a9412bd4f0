//! Quality analytics API handler

use axum::{extract::State, routing::get, Json, Router};

use crate::error::ApiResult;
use crate::stats::{build_report, QualityReport};
use crate::AppState;

/// GET /analytics
///
/// Aggregation report over the current record snapshot. Pure read;
/// safe to call while a batch scan is in progress (stale-but-consistent
/// against in-flight appends).
pub async fn analytics(State(state): State<AppState>) -> ApiResult<Json<QualityReport>> {
    let snapshot = crate::db::records::list_records(&state.db).await?;
    Ok(Json(build_report(&snapshot)))
}

/// Build analytics routes
pub fn analytics_routes() -> Router<AppState> {
    Router::new().route("/analytics", get(analytics))
}
