//! CLI arguments and subcommands for opcache-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use opcache_exporter::config::ConfigFormat;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses a level name from a config file.
    pub fn from_name(name: &str) -> Option<Self> {
        LogLevel::from_str(name, true).ok()
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "opcache-exporter",
    about = "Prometheus exporter for PHP OPcache status polled over FastCGI",
    long_about = "Prometheus exporter for PHP OPcache status polled over FastCGI.\n\n\
                  On every scrape the exporter connects to each configured PHP-FPM pool, \
                  runs a small script that prints opcache_get_status() as JSON and \
                  republishes the values as gauges labelled with fcgi_uri.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Path under which to expose metrics
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// FastCGI URI(s) to poll, separated by semicolons
    /// (tcp://host:port, unix:///path or host:port)
    #[arg(long)]
    pub fcgi_uri: Option<String>,

    /// Path to a PHP script on the FastCGI host that echoes json-encoded OPcache status
    #[arg(long)]
    pub script_path: Option<PathBuf>,

    /// Directory where the temporary PHP script is created when --script-path is not set
    #[arg(long)]
    pub script_dir: Option<PathBuf>,

    /// Connect/read/write timeout for FastCGI requests in milliseconds (default: none)
    #[arg(long)]
    pub fcgi_timeout_ms: Option<u64>,

    /// Log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Disable internal opcache_exporter_* metrics
    #[arg(long)]
    pub disable_telemetry: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll every configured target once and report the result
    Check {
        /// Print the decoded snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}
