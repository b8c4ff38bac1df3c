//! Exporter configuration.
//!
//! Values come from CLI flags, an optional YAML/JSON/TOML file and built-in
//! defaults, in that order of precedence.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::target::{parse_targets, Target};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9101;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_FCGI_URI: &str = "tcp://127.0.0.1:9000";

/// Paths tried when no config file is given explicitly.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/opcache-exporter/config.yaml",
    "/etc/opcache-exporter/config.yml",
    "/etc/opcache-exporter/config.json",
    "/etc/opcache-exporter/config.toml",
    "./opcache-exporter.yaml",
    "./opcache-exporter.yml",
    "./opcache-exporter.json",
    "./opcache-exporter.toml",
];

/// Output format for generated or displayed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Paths served by the exporter itself, which the metrics path must not shadow.
const RESERVED_PATHS: &[&str] = &["/", "/health", "/doc"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "telemetry-path")]
    pub metrics_path: Option<String>,

    // FastCGI targets
    /// One or more URIs separated by `;`.
    #[serde(alias = "fcgi-uri")]
    pub fcgi_uri: Option<String>,
    /// Status script as seen by the PHP runtime. Generated when unset.
    #[serde(alias = "script-path")]
    pub script_path: Option<PathBuf>,
    /// Where the generated script is written.
    #[serde(alias = "script-dir")]
    pub script_dir: Option<PathBuf>,
    #[serde(alias = "fcgi-timeout-ms")]
    pub fcgi_timeout_ms: Option<u64>,

    // Feature flags
    pub enable_health: Option<bool>,
    pub enable_telemetry: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            fcgi_uri: Some(DEFAULT_FCGI_URI.to_string()),
            script_path: None,
            script_dir: None,
            fcgi_timeout_ms: None,
            enable_health: Some(true),
            enable_telemetry: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn metrics_path(&self) -> &str {
        self.metrics_path.as_deref().unwrap_or(DEFAULT_METRICS_PATH)
    }

    pub fn fcgi_uri(&self) -> &str {
        self.fcgi_uri.as_deref().unwrap_or(DEFAULT_FCGI_URI)
    }

    pub fn fcgi_timeout(&self) -> Option<Duration> {
        self.fcgi_timeout_ms.map(Duration::from_millis)
    }

    /// Parses the configured URIs against the resolved script path.
    pub fn targets(&self, script_path: &Path) -> Result<Vec<Target>> {
        parse_targets(self.fcgi_uri(), &script_path.to_string_lossy())
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    cfg.bind()
        .parse::<IpAddr>()
        .map_err(|e| Error::Config(format!("invalid bind address '{}': {}", cfg.bind(), e)))?;

    let path = cfg.metrics_path();
    if !path.starts_with('/') {
        return Err(Error::Config(format!(
            "metrics_path '{path}' must start with '/'"
        )));
    }
    if path.contains(['{', '}']) {
        return Err(Error::Config(format!(
            "metrics_path '{path}' must not contain route captures"
        )));
    }
    if RESERVED_PATHS.contains(&path) {
        return Err(Error::Config(format!(
            "metrics_path '{path}' collides with a built-in endpoint"
        )));
    }

    if cfg.fcgi_timeout_ms == Some(0) {
        return Err(Error::Config(
            "fcgi_timeout_ms must be greater than 0 (leave unset to disable)".into(),
        ));
    }

    // The script path only matters for the label-free parse here
    parse_targets(cfg.fcgi_uri(), "")?;

    if let Some(dir) = &cfg.script_dir {
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "script_dir '{}' is not a directory",
                dir.display()
            )));
        }
    }

    Ok(())
}

/// Loads a config file, or the first default location that exists.
///
/// Returns the defaults when nothing is found.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file '{}' not found",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, &path)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses `content` in the format implied by the extension of `path`
/// (YAML when unknown). Missing keys fall back to the defaults.
pub fn parse_config(content: &str, path: &Path) -> Result<Config> {
    let loaded: std::result::Result<Config, String> =
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(content).map_err(|e| e.to_string()),
            Some("toml") => toml::from_str(content).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        };
    loaded
        .map(Config::or_defaults)
        .map_err(|e| Error::Serialization(format!("{}: {}", path.display(), e)))
}

impl Config {
    /// Fills unset fields from `Config::default()`.
    fn or_defaults(self) -> Self {
        let d = Config::default();
        Self {
            port: self.port.or(d.port),
            bind: self.bind.or(d.bind),
            metrics_path: self.metrics_path.or(d.metrics_path),
            fcgi_uri: self.fcgi_uri.or(d.fcgi_uri),
            script_path: self.script_path.or(d.script_path),
            script_dir: self.script_dir.or(d.script_dir),
            fcgi_timeout_ms: self.fcgi_timeout_ms.or(d.fcgi_timeout_ms),
            enable_health: self.enable_health.or(d.enable_health),
            enable_telemetry: self.enable_telemetry.or(d.enable_telemetry),
            log_level: self.log_level.or(d.log_level),
        }
    }
}

/// Serializes `config` in the requested format.
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String> {
    let rendered = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
    };
    rendered.map_err(Error::Serialization)
}
