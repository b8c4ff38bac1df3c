//! HTTP endpoint handlers for the exporter.
//!
//! - `<metrics_path>`: Prometheus metrics endpoint
//! - `/`: Landing page
//! - `/health`: Poll statistics per target
//! - `/doc`: Documentation endpoint

pub mod doc;
pub mod health;
pub mod index;
pub mod metrics;

// Re-export handlers
pub use doc::doc_handler;
pub use health::health_handler;
pub use index::index_handler;
pub use metrics::metrics_handler;
