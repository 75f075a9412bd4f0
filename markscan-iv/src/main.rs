//! markscan-iv - Inspection & Verification service
//!
//! Orchestrates batch and manual counterfeit-marking scans against the
//! external classification endpoint, persists inspection records, and
//! serves the flagged queue and quality analytics over HTTP REST + SSE.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use markscan_common::config::{self, TomlConfig};
use markscan_common::events::EventBus;

use markscan_iv::services::ClassifierClient;
use markscan_iv::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting markscan-iv (Inspection & Verification)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let toml_config = TomlConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TomlConfig::default()
    });

    let data_dir = config::resolve_data_dir(&toml_config);
    config::ensure_data_dir(&data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize data directory: {}", e))?;
    info!("Data directory: {}", data_dir.display());

    let db_path = data_dir.join("markscan.db");
    let db_pool = markscan_iv::db::init_database_pool(&db_path).await?;
    info!("Record store ready: {}", db_path.display());

    let event_bus = EventBus::new(100);

    let classifier_url = markscan_iv::config::resolve_classifier_url(&toml_config);
    let classifier = ClassifierClient::new(&classifier_url)?;
    info!("Classification endpoint: {}", classifier_url);

    let pacing = Duration::from_millis(
        toml_config
            .pacing_ms
            .unwrap_or(markscan_iv::services::DEFAULT_PACING_MS),
    );

    let state = AppState::new(
        db_pool,
        event_bus,
        classifier,
        data_dir.join("uploads"),
        pacing,
    );
    let app = markscan_iv::build_router(state);

    let bind = markscan_iv::config::resolve_bind(&toml_config);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
