//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$COAPPS_CONFIG` (environment variable)
//! 2. `~/.config/coapps/config.toml` (Linux/macOS)
//!    `%APPDATA%\coapps\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! The per-project deployment manifest (`coapps.json`) lives in
//! [`crate::manifest`]; this file only tunes how deployments run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::ContentTypeRule;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Upload pipeline tuning.
    pub upload: UploadConfig,
    /// Content-type classification.
    pub classify: ClassifyConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Upload pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum number of uploads in flight at once.
    pub max_concurrency: usize,
    /// Per-request timeout against the document store, in seconds.
    pub request_timeout_secs: u64,
    /// Descend into subdirectories of listed directories.
    pub recursive_directories: bool,
}

/// Content-type classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Number of leading bytes read when sniffing.
    pub sniff_bytes: usize,
    /// Content type used when sniffing finds nothing or fails.
    pub default_content_type: String,
    /// Extra suffix rules, consulted before the built-in table.
    pub rules: Vec<ContentTypeRule>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            request_timeout_secs: 60,
            recursive_directories: true,
        }
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            sniff_bytes: 8 * 1024,
            default_content_type: crate::classify::DEFAULT_CONTENT_TYPE.to_string(),
            rules: Vec::new(),
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("COAPPS_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("coapps").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coapps")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.upload.max_concurrency, 3);
        assert_eq!(cfg.upload.request_timeout_secs, 60);
        assert_eq!(cfg.classify.default_content_type, "application/octet-stream");
        assert!(cfg.classify.rules.is_empty());
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.log_level, cfg.general.log_level);
        assert_eq!(parsed.upload.max_concurrency, cfg.upload.max_concurrency);
        assert_eq!(parsed.classify.sniff_bytes, cfg.classify.sniff_bytes);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[upload]
max_concurrency = 1

[[classify.rules]]
suffix = ".tpl"
content_type = "text/html"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.upload.max_concurrency, 1);
        assert_eq!(cfg.classify.rules.len(), 1);
        assert_eq!(cfg.classify.rules[0].suffix, ".tpl");
        // Other fields use defaults
        assert_eq!(cfg.upload.request_timeout_secs, 60);
        assert_eq!(cfg.general.log_level, "warn");
    }
}
