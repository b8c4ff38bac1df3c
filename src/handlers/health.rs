//! Health check endpoint handler.
//!
//! The exporter itself is healthy as long as it serves requests, so the
//! status is always 200. Failing targets are reported in the body.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = concat!(
    "opcache-exporter ",
    env!("CARGO_PKG_VERSION"),
    " - see /doc for endpoints and metrics"
);

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let reports = state.poll_reports();
    let failing = reports.iter().filter(|r| r.last_poll_failed).count();

    let message = if failing == 0 {
        "OK".to_string()
    } else {
        format!("OK - {} of {} targets failing", failing, reports.len())
    };

    let table = state.health_stats.render_table(&reports);

    debug!("Health check: {}", message);
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{FOOTER_TEXT}\n"),
    )
}
