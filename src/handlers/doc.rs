//! Documentation endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use opcache_exporter::collector::{NAMESPACE, URI_LABEL};
use opcache_exporter::METRICS;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");
    state.health_stats.record_http_request();

    let doc = render_doc(
        state.config.metrics_path(),
        state.config.enable_health.unwrap_or(true),
        state.telemetry.is_some(),
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{doc}\n{FOOTER_TEXT}\n"),
    )
}

fn render_doc(metrics_path: &str, health: bool, telemetry: bool) -> String {
    let mut out = String::new();
    writeln!(out, "OPCACHE EXPORTER - DOCUMENTATION").ok();
    writeln!(out, "================================").ok();
    writeln!(out).ok();
    writeln!(out, "VERSION: {}", env!("CARGO_PKG_VERSION")).ok();
    writeln!(
        out,
        "DESCRIPTION: Prometheus exporter for PHP OPcache status polled over FastCGI"
    )
    .ok();
    writeln!(out).ok();

    writeln!(out, "HTTP ENDPOINTS").ok();
    writeln!(out, "--------------").ok();
    writeln!(out, "GET {:16} - Prometheus metrics endpoint", metrics_path).ok();
    writeln!(out, "GET {:16} - Landing page", "/").ok();
    if health {
        writeln!(out, "GET {:16} - Poll statistics per target", "/health").ok();
    }
    writeln!(out, "GET {:16} - This documentation", "/doc").ok();
    writeln!(out).ok();

    writeln!(out, "AVAILABLE METRICS").ok();
    writeln!(out, "-----------------").ok();
    writeln!(
        out,
        "All gauges carry the label {}=\"<uri as configured>\".",
        URI_LABEL
    )
    .ok();
    writeln!(
        out,
        "Values are 0 when the target could not be polled or decoded."
    )
    .ok();
    writeln!(out).ok();
    for spec in METRICS.iter() {
        let name = format!("{}_{}", NAMESPACE, spec.name);
        writeln!(out, "{:50} - {}", name, spec.help).ok();
    }
    if telemetry {
        writeln!(out).ok();
        writeln!(
            out,
            "{:50} - Build information",
            "opcache_exporter_build_info"
        )
        .ok();
        writeln!(
            out,
            "{:50} - Time spent serving the last metrics request",
            "opcache_exporter_scrape_duration_seconds"
        )
        .ok();
    }
    writeln!(out).ok();

    writeln!(out, "CLI COMMANDS").ok();
    writeln!(out, "------------").ok();
    writeln!(out, "opcache-exporter                        - Start the exporter").ok();
    writeln!(
        out,
        "opcache-exporter check [--json]         - Poll every target once"
    )
    .ok();
    writeln!(
        out,
        "opcache-exporter config -o config.yaml  - Generate config file"
    )
    .ok();
    writeln!(
        out,
        "opcache-exporter --help                 - Show all CLI options"
    )
    .ok();

    out
}
