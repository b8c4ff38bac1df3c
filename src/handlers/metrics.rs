//! Metrics endpoint handler for Prometheus scraping.
//!
//! Every request polls all targets at once. The FastCGI client is blocking,
//! so each target is collected on the blocking pool.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use opcache_exporter::gather_targets;
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 16 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, MetricsError> {
    let start = Instant::now();
    debug!("Processing metrics request");
    state.health_stats.record_http_request();

    let mut families = gather_targets(&state.collectors).await;

    let elapsed = start.elapsed().as_secs_f64();
    state.health_stats.record_scrape(elapsed);

    if let Some(telemetry) = &state.telemetry {
        telemetry.scrape_duration.set(elapsed);
        families.extend(telemetry.registry.gather());
    }

    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        error!("Failed to encode Prometheus metrics: {}", e);
        return Err(MetricsError::EncodingFailed);
    }

    debug!(
        "Metrics request completed: {} targets, {} families, {} bytes, {:.3}ms",
        state.collectors.len(),
        families.len(),
        buffer.len(),
        elapsed * 1000.0
    );

    Ok((
        [("Content-Type", encoder.format_type().to_string())],
        buffer,
    ))
}
