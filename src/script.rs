//! Helper PHP script that prints the OPcache status as JSON.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info};

use crate::error::Result;

/// What the remote runtime executes for every poll.
pub const STATUS_SCRIPT: &str = "<?php\necho(json_encode(opcache_get_status()));\n";

/// Either a user-supplied script path or a generated temporary script.
///
/// A generated script is deleted when this value is dropped.
#[derive(Debug)]
pub enum StatusScript {
    Provided(PathBuf),
    Generated(NamedTempFile),
}

impl StatusScript {
    /// Uses `script_path` when given, otherwise writes `opcache.*.php` into
    /// `script_dir` (or the system temp directory).
    pub fn resolve(script_path: Option<&Path>, script_dir: Option<&Path>) -> Result<Self> {
        if let Some(path) = script_path {
            // Names a file on the PHP host, which may not be this machine
            debug!("Using provided status script {}", path.display());
            return Ok(StatusScript::Provided(path.to_path_buf()));
        }

        let mut builder = Builder::new();
        builder.prefix("opcache.").suffix(".php");
        let mut file = match script_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        file.write_all(STATUS_SCRIPT.as_bytes())?;
        file.flush()?;
        make_world_readable(file.path())?;

        info!("Generated status script {}", file.path().display());
        Ok(StatusScript::Generated(file))
    }

    pub fn path(&self) -> &Path {
        match self {
            StatusScript::Provided(path) => path,
            StatusScript::Generated(file) => file.path(),
        }
    }
}

/// PHP-FPM workers usually run as another user than the exporter.
#[cfg(unix)]
fn make_world_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
