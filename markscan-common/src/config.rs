//! Configuration loading and data directory resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// TOML configuration file contents
///
/// All fields are optional; missing values fall back to compiled
/// defaults. Environment variables override the file (see
/// markscan-iv's resolution helpers).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the external classification service
    pub classifier_url: Option<String>,
    /// Address the HTTP server binds to (e.g. "127.0.0.1:5731")
    pub bind: Option<String>,
    /// Pacing delay between batch items, in milliseconds
    pub pacing_ms: Option<u64>,
    /// Data directory override (database + stored scan images)
    pub data_dir: Option<String>,
}

impl TomlConfig {
    /// Load configuration following the priority order:
    /// 1. MARKSCAN_CONFIG environment variable (explicit path)
    /// 2. Platform config directory (~/.config/markscan/config.toml)
    /// 3. Compiled defaults (empty config)
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("MARKSCAN_CONFIG") {
            return Self::load_from(PathBuf::from(path));
        }

        if let Some(dir) = dirs::config_dir() {
            let path = dir.join("markscan").join("config.toml");
            if path.exists() {
                return Self::load_from(path);
            }
        }

        Ok(Self::default())
    }

    /// Load and parse a specific config file
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Resolve the data directory (database and stored scan images).
///
/// Priority: MARKSCAN_DATA_DIR env var, then TOML `data_dir`, then the
/// OS-dependent default application data directory.
pub fn resolve_data_dir(config: &TomlConfig) -> PathBuf {
    if let Ok(dir) = std::env::var("MARKSCAN_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(dir) = &config.data_dir {
        return PathBuf::from(dir);
    }

    default_data_dir()
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("markscan"))
        .unwrap_or_else(|| PathBuf::from("./markscan_data"))
}

/// Create the data directory (and uploads subdirectory) if missing
pub fn ensure_data_dir(dir: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(dir.join("uploads"))?;
    Ok(())
}
