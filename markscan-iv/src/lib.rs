//! markscan-iv library interface
//!
//! Inspection & Verification service: batch/manual scan orchestration,
//! the inspection record store, the flagged queue, and quality
//! analytics over the accumulated records.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod stats;

pub use crate::error::{ApiError, ApiResult};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use uuid::Uuid;

use markscan_common::events::EventBus;

use crate::services::{ClassifierClient, PendingVerdict};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (the record store)
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Client for the external classification endpoint
    pub classifier: Arc<ClassifierClient>,
    /// Directory scan image display copies are stored under
    pub uploads_dir: PathBuf,
    /// Pacing delay between batch items
    pub pacing: Duration,
    /// Cancellation tokens for active batch scan sessions
    pub active_scans: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Pending manual verdict awaiting the operator's decision
    pub pending_manual: Arc<RwLock<Option<PendingVerdict>>>,
    /// Guard against re-entrant manual scans while one is in flight
    pub manual_in_flight: Arc<AtomicBool>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        classifier: ClassifierClient,
        uploads_dir: PathBuf,
        pacing: Duration,
    ) -> Self {
        Self {
            db,
            event_bus,
            classifier: Arc::new(classifier),
            uploads_dir,
            pacing,
            active_scans: Arc::new(RwLock::new(HashMap::new())),
            pending_manual: Arc::new(RwLock::new(None)),
            manual_in_flight: Arc::new(AtomicBool::new(false)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let uploads = ServeDir::new(&state.uploads_dir);

    Router::new()
        .merge(api::scan_routes())
        .merge(api::record_routes())
        .merge(api::analytics_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .nest_service("/uploads", uploads)
        .with_state(state)
}
