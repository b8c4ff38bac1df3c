//! Config command: writes a default configuration file.

use anyhow::Result;
use opcache_exporter::config::{render_config, ConfigFormat};
use opcache_exporter::Config;
use std::fs;
use std::path::PathBuf;

/// Generates a configuration file with the built-in defaults.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from(default_file_name(format)));

    let mut content = render_config(&config, format)?;
    if commented && format == ConfigFormat::Yaml {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

fn default_file_name(format: ConfigFormat) -> &'static str {
    match format {
        ConfigFormat::Yaml => "opcache-exporter.yaml",
        ConfigFormat::Json => "opcache-exporter.json",
        ConfigFormat::Toml => "opcache-exporter.toml",
    }
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# OPcache Exporter Configuration
# ==============================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9101                   # HTTP port
# metrics_path: /metrics       # Path under which metrics are exposed
#
# FastCGI Targets
# ---------------
# fcgi_uri: "tcp://127.0.0.1:9000"
#                              # One or more URIs separated by ';'
#                              # tcp://host:port, unix:///path/to.sock or host:port
# script_path: null            # Status script as seen by PHP (generated when unset)
# script_dir: null             # Directory for the generated script (system temp dir)
# fcgi_timeout_ms: null        # Connect/read/write timeout (null = none)
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
# enable_telemetry: true       # Export opcache_exporter_* self-metrics
#
# Logging
# -------
# log_level: info              # off, error, warn, info, debug, trace
#
"#;
    format!("{}\n{}", comments, yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcache_exporter::config::parse_config;
    use std::path::Path;

    #[test]
    fn test_commented_yaml_still_parses() {
        let rendered = render_config(&Config::default(), ConfigFormat::Yaml).unwrap();
        let yaml = add_config_comments(rendered);
        assert!(yaml.starts_with("# OPcache Exporter Configuration"));
        let parsed = parse_config(&yaml, Path::new("opcache-exporter.yaml")).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        command_config(Some(path.clone()), ConfigFormat::Toml, true).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("port = 9101"));
        assert!(!written.starts_with('#'));
    }
}
