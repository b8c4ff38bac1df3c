//! opcache-exporter - Prometheus exporter for PHP OPcache.
//!
//! Polls one or more PHP-FPM pools over FastCGI on every scrape and exposes
//! the `opcache_get_status()` values as gauges.

use anyhow::{anyhow, Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use opcache_exporter::config::{load_config, render_config, validate_effective_config, Config};
use opcache_exporter::script::StatusScript;
use opcache_exporter::OpcacheCollector;
use prometheus::{Gauge, Opts, Registry};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

mod cli;
mod commands;
mod handlers;
mod health_stats;
mod state;

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_config};
use handlers::{doc_handler, health_handler, index_handler, metrics_handler};
use health_stats::HealthStats;
use state::{AppState, SharedState, Telemetry};

const TELEMETRY_NAMESPACE: &str = "opcache_exporter";

/// Resolves configuration from CLI args, config file, and defaults.
///
/// Precedence: CLI (if provided) > config file > default.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = Some(path.clone());
    }
    if let Some(uri) = &args.fcgi_uri {
        config.fcgi_uri = Some(uri.clone());
    }
    if let Some(path) = &args.script_path {
        config.script_path = Some(path.clone());
    }
    if let Some(dir) = &args.script_dir {
        config.script_dir = Some(dir.clone());
    }
    if args.fcgi_timeout_ms.is_some() {
        config.fcgi_timeout_ms = args.fcgi_timeout_ms;
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_telemetry {
        config.enable_telemetry = Some(false);
    }

    Ok(config)
}

/// Effective log level: CLI > config file > info.
fn resolve_log_level(config: &Config) -> Result<LevelFilter> {
    match config.log_level.as_deref() {
        None => Ok(LevelFilter::INFO),
        Some(name) => LogLevel::from_name(name)
            .map(LevelFilter::from)
            .ok_or_else(|| anyhow!("invalid log_level '{}'", name)),
    }
}

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(level: LevelFilter) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    debug!("Logging initialized with level: {}", level);
    Ok(())
}

/// Builds the `opcache_exporter_*` self-metrics.
fn build_telemetry() -> Result<Telemetry> {
    let registry = Registry::new();
    let revision = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown");

    let build_info = Gauge::with_opts(
        Opts::new("build_info", "Build information of opcache-exporter")
            .namespace(TELEMETRY_NAMESPACE)
            .const_label("version", env!("CARGO_PKG_VERSION"))
            .const_label("revision", revision),
    )?;
    build_info.set(1.0);

    let scrape_duration = Gauge::with_opts(
        Opts::new(
            "scrape_duration_seconds",
            "Time spent polling all targets for the last metrics request",
        )
        .namespace(TELEMETRY_NAMESPACE),
    )?;

    registry.register(Box::new(build_info))?;
    registry.register(Box::new(scrape_duration.clone()))?;

    Ok(Telemetry {
        registry,
        scrape_duration,
    })
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn build_router(state: SharedState) -> Router {
    let config = &state.config;

    let mut app = Router::new()
        .route(config.metrics_path(), get(metrics_handler))
        .route("/", get(index_handler))
        .route("/doc", get(doc_handler));

    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    app.with_state(state)
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting opcache-exporter {}", env!("CARGO_PKG_VERSION"));

    // Must outlive the server; a generated script is removed on drop
    let script = StatusScript::resolve(config.script_path.as_deref(), config.script_dir.as_deref())
        .context("Failed to prepare status script")?;

    let mut collectors = Vec::new();
    for target in config.targets(script.path())? {
        info!(
            fcgi_uri = target.uri(),
            "Registering target {} (script {})",
            target.endpoint(),
            target.script_path()
        );
        collectors.push(Arc::new(OpcacheCollector::new(
            target,
            config.fcgi_timeout(),
        )?));
    }
    debug!("Registered {} collectors", collectors.len());

    let telemetry = if config.enable_telemetry.unwrap_or(true) {
        Some(build_telemetry()?)
    } else {
        None
    };

    let ip: IpAddr = config
        .bind()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind()))?;
    let addr = SocketAddr::new(ip, config.port());

    let state = Arc::new(AppState {
        collectors,
        telemetry,
        config: Arc::new(config),
        health_stats: Arc::new(HealthStats::new()),
    });

    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "opcache-exporter listening on http://{}{}",
        addr,
        state.config.metrics_path()
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    if let StatusScript::Generated(_) = &script {
        info!("Removing generated status script {}", script.path().display());
    }
    drop(script);

    info!("opcache-exporter stopped gracefully");
    Ok(())
}

/// Exits with status 1 when the effective config is unusable.
fn validate_or_exit(config: &Config) -> LevelFilter {
    let checked = validate_effective_config(config)
        .map_err(anyhow::Error::from)
        .and_then(|_| resolve_log_level(config));
    match checked {
        Ok(level) => level,
        Err(e) => {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    if args.check_config {
        validate_or_exit(&config);
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        print!("{}", render_config(&config, args.config_format)?);
        return Ok(());
    }

    match &args.command {
        Some(Commands::Config {
            output,
            format,
            commented,
        }) => command_config(output.clone(), *format, *commented),
        Some(Commands::Check { json }) => {
            setup_logging(validate_or_exit(&config))?;
            command_check(*json, &config)
        }
        None => {
            setup_logging(validate_or_exit(&config))?;
            run_server(config).await
        }
    }
}
