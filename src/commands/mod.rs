//! CLI command implementations for opcache-exporter.
//!
//! - `check`: Poll every target once
//! - `config`: Configuration file generation

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
