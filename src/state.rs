//! Application state shared by the HTTP handlers.

use opcache_exporter::{Config, OpcacheCollector, PollReport};
use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::health_stats::HealthStats;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    /// One collector per FastCGI target, polled on every scrape.
    pub collectors: Vec<Arc<OpcacheCollector>>,
    /// Exporter self-metrics, appended after the targets.
    pub telemetry: Option<Telemetry>,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
}

pub struct Telemetry {
    pub registry: Registry,
    pub scrape_duration: Gauge,
}

impl AppState {
    pub fn poll_reports(&self) -> Vec<PollReport> {
        self.collectors.iter().map(|c| c.report()).collect()
    }
}
