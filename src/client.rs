//! FastCGI status client.
//!
//! Dials the target once per call, asks the PHP runtime to run the status
//! script and decodes what it prints. Nothing is pooled, cached or retried.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::fcgi;
use crate::status::StatusSnapshot;
use crate::target::{Endpoint, Target};

/// Something that can produce a fresh status snapshot on demand.
///
/// The collector only depends on this trait; `FcgiStatusClient` is the real
/// implementation.
pub trait StatusSource: Send + Sync {
    fn fetch(&self) -> Result<StatusSnapshot>;
}

/// Polls one target over FastCGI.
#[derive(Debug, Clone)]
pub struct FcgiStatusClient {
    target: Target,
    timeout: Option<Duration>,
}

impl FcgiStatusClient {
    /// `timeout` bounds connect, read and write separately; `None` waits forever.
    pub fn new(target: Target, timeout: Option<Duration>) -> Self {
        Self { target, timeout }
    }

    fn params(&self) -> [(&str, &str); 3] {
        [
            ("SCRIPT_FILENAME", self.target.script_path()),
            ("REQUEST_METHOD", "GET"),
            ("CONTENT_LENGTH", "0"),
        ]
    }

    fn exchange<S: Read + Write>(&self, mut stream: S) -> Result<fcgi::FcgiResponse> {
        fcgi::round_trip(&mut stream, &self.params()).map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: io::Error) -> Error {
        let uri = self.target.uri().to_string();
        match err.kind() {
            io::ErrorKind::InvalidData => Error::Protocol {
                uri,
                reason: err.to_string(),
            },
            _ => Error::Connection { uri, source: err },
        }
    }

    fn dial_tcp(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = match self.timeout {
            None => TcpStream::connect(addr)?,
            Some(timeout) => {
                let mut last_err = None;
                let mut connected = None;
                for sock_addr in addr.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&sock_addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match connected {
                    Some(stream) => stream,
                    None => {
                        return Err(last_err.unwrap_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::NotFound,
                                format!("{addr} did not resolve to any address"),
                            )
                        }))
                    }
                }
            }
        };
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    #[cfg(unix)]
    fn dial_unix(&self, path: &std::path::Path) -> io::Result<std::os::unix::net::UnixStream> {
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        Ok(stream)
    }

    #[cfg(not(unix))]
    fn dial_unix(&self, _path: &std::path::Path) -> io::Result<TcpStream> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        ))
    }

    fn connection_error(&self, source: io::Error) -> Error {
        Error::Connection {
            uri: self.target.uri().to_string(),
            source,
        }
    }
}

impl StatusSource for FcgiStatusClient {
    fn fetch(&self) -> Result<StatusSnapshot> {
        trace!(endpoint = %self.target.endpoint(), "Dialing FastCGI target");

        let response = match self.target.endpoint() {
            Endpoint::Tcp(addr) => {
                let stream = self.dial_tcp(addr).map_err(|e| self.connection_error(e))?;
                self.exchange(stream)?
            }
            Endpoint::Unix(path) => {
                let stream = self.dial_unix(path).map_err(|e| self.connection_error(e))?;
                self.exchange(stream)?
            }
        };

        if !response.stderr.is_empty() {
            warn!(
                fcgi_uri = %self.target.uri(),
                "FastCGI stderr: {}",
                String::from_utf8_lossy(&response.stderr).trim_end()
            );
        }
        debug!(
            fcgi_uri = %self.target.uri(),
            status = ?response.status,
            app_status = response.app_status,
            content_type = response.header("Content-type").unwrap_or("-"),
            bytes = response.body.len(),
            "Received OPcache status"
        );

        StatusSnapshot::from_json(&response.body).map_err(|source| Error::Decode {
            uri: self.target.uri().to_string(),
            body: String::from_utf8_lossy(&response.body).into_owned(),
            source,
        })
    }
}
