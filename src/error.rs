//! Error types for the OPcache exporter.

use thiserror::Error;

/// Errors raised while configuring targets or polling them.
///
/// `Connection`, `Protocol` and `Decode` are recovered by the collector during a
/// scrape; `Config` is fatal at startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to reach FastCGI target {uri}: {source}")]
    Connection {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("FastCGI protocol error from {uri}: {reason}")]
    Protocol { uri: String, reason: String },

    /// The body is kept verbatim, it is usually the only clue about what the
    /// remote script printed instead of JSON.
    #[error("failed to decode OPcache status from {uri}: {source}; response body: {body:?}")]
    Decode {
        uri: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using the exporter's Error.
pub type Result<T> = std::result::Result<T, Error>;
