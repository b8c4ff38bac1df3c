//! Prometheus exporter for PHP OPcache.
//!
//! Every configured FastCGI target gets an [`collector::OpcacheCollector`]
//! that, on each scrape, asks PHP to run a small status script and publishes
//! the decoded `opcache_get_status()` output as gauges.

pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod fcgi;
pub mod script;
pub mod status;
pub mod target;

pub use client::{FcgiStatusClient, StatusSource};
pub use collector::{gather_targets, OpcacheCollector, PollReport, METRICS};
pub use config::Config;
pub use error::{Error, Result};
pub use status::StatusSnapshot;
pub use target::{Endpoint, Target};
