//! FastCGI target parsing.
//!
//! A target is written as `tcp://host:port`, `unix:///path/to/socket` or a bare
//! `host:port`, which older configurations used and which is read as
//! `tcp://host:port`. The string as written is kept for the `fcgi_uri` label.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Separator between URIs in a multi-target configuration value.
pub const TARGET_SEPARATOR: char = ';';

/// Where to dial a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`, resolved at dial time.
    Tcp(String),
    /// Path of a Unix domain socket.
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// One monitored OPcache instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    uri: String,
    endpoint: Endpoint,
    script_path: String,
}

impl Target {
    /// Parses `uri` and binds it to the script the remote PHP runtime must execute.
    pub fn parse(uri: &str, script_path: impl Into<String>) -> Result<Self> {
        let endpoint = parse_endpoint(uri)?;
        Ok(Self {
            uri: uri.to_string(),
            endpoint,
            script_path: script_path.into(),
        })
    }

    /// The URI exactly as configured, before normalization.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn script_path(&self) -> &str {
        &self.script_path
    }
}

/// Splits a `;`-separated list of URIs into targets sharing one script path.
///
/// Blank segments are skipped. Surrounding whitespace is rejected, as the
/// label must be the URI as written. Duplicate URIs are rejected since they
/// would register the same time series twice.
pub fn parse_targets(list: &str, script_path: &str) -> Result<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::new();

    for raw in list.split(TARGET_SEPARATOR) {
        if raw.trim().is_empty() {
            continue;
        }
        if raw.trim() != raw {
            return Err(Error::Config(format!(
                "FastCGI URI '{raw}' has leading or trailing whitespace"
            )));
        }
        if targets.iter().any(|t| t.uri == raw) {
            return Err(Error::Config(format!("duplicate FastCGI URI '{raw}'")));
        }
        targets.push(Target::parse(raw, script_path)?);
    }

    if targets.is_empty() {
        return Err(Error::Config("no FastCGI URI configured".into()));
    }

    Ok(targets)
}

fn parse_endpoint(uri: &str) -> Result<Endpoint> {
    // Bare host:port predates scheme support
    let (scheme, rest) = uri.split_once("://").unwrap_or(("tcp", uri));

    match scheme {
        "tcp" => {
            let authority = rest.split('/').next().unwrap_or_default();
            let Some((host, port)) = authority.rsplit_once(':') else {
                return Err(Error::Config(format!(
                    "FastCGI URI '{uri}' is missing a port"
                )));
            };
            if host.is_empty() || host == "[]" {
                return Err(Error::Config(format!("FastCGI URI '{uri}' has no host")));
            }
            let bracketed = host.starts_with('[') && host.ends_with(']');
            if host.contains(':') && !bracketed {
                return Err(Error::Config(format!(
                    "FastCGI URI '{uri}' has an IPv6 host without brackets (use [addr]:port)"
                )));
            }
            if (host.starts_with('[') || host.ends_with(']')) && !bracketed {
                return Err(Error::Config(format!(
                    "FastCGI URI '{uri}' has unbalanced brackets"
                )));
            }
            port.parse::<u16>().map_err(|_| {
                Error::Config(format!("FastCGI URI '{uri}' has an invalid port '{port}'"))
            })?;
            Ok(Endpoint::Tcp(authority.to_string()))
        }
        "unix" => {
            if !rest.starts_with('/') || rest.len() < 2 {
                return Err(Error::Config(format!(
                    "FastCGI URI '{uri}' must name an absolute socket path (unix:///path)"
                )));
            }
            Ok(Endpoint::Unix(PathBuf::from(rest)))
        }
        other => Err(Error::Config(format!(
            "unsupported scheme '{other}' in FastCGI URI '{uri}', expected tcp or unix"
        ))),
    }
}
