//! Configuration resolution for markscan-iv
//!
//! Resolves the classification endpoint and server settings with
//! ENV -> TOML -> compiled default priority.

use markscan_common::config::TomlConfig;
use tracing::{info, warn};

/// Compiled default classification endpoint
pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8000";

/// Default HTTP bind address for markscan-iv
pub const DEFAULT_BIND: &str = "127.0.0.1:5731";

/// Resolve the classifier base URL.
///
/// Priority: MARKSCAN_CLASSIFIER_URL environment variable, then the
/// TOML config, then the compiled default. Warns when both sources are
/// set, since that usually signals a stale config file.
pub fn resolve_classifier_url(config: &TomlConfig) -> String {
    let env_url = std::env::var("MARKSCAN_CLASSIFIER_URL").ok();
    let toml_url = config.classifier_url.clone();

    if env_url.is_some() && toml_url.is_some() {
        warn!("Classifier URL set in both environment and TOML config; using environment");
    }

    if let Some(url) = env_url {
        info!("Classifier URL loaded from environment variable");
        return url;
    }
    if let Some(url) = toml_url {
        info!("Classifier URL loaded from TOML config");
        return url;
    }

    info!("Classifier URL not configured, using default {}", DEFAULT_CLASSIFIER_URL);
    DEFAULT_CLASSIFIER_URL.to_string()
}

/// Resolve the HTTP bind address (TOML or default; no env override)
pub fn resolve_bind(config: &TomlConfig) -> String {
    config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_var_wins_over_toml() {
        let config = TomlConfig {
            classifier_url: Some("http://classifier.internal:9000".into()),
            ..Default::default()
        };
        std::env::set_var("MARKSCAN_CLASSIFIER_URL", "http://env-host:7000");
        let resolved = resolve_classifier_url(&config);
        std::env::remove_var("MARKSCAN_CLASSIFIER_URL");
        assert_eq!(resolved, "http://env-host:7000");
    }

    #[test]
    #[serial]
    fn toml_value_wins_over_default() {
        let config = TomlConfig {
            classifier_url: Some("http://classifier.internal:9000".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_classifier_url(&config),
            "http://classifier.internal:9000"
        );
    }

    #[test]
    #[serial]
    fn default_used_when_unconfigured() {
        assert_eq!(
            resolve_classifier_url(&TomlConfig::default()),
            DEFAULT_CLASSIFIER_URL
        );
        assert_eq!(resolve_bind(&TomlConfig::default()), DEFAULT_BIND);
    }
}
