//! Host preparation done once at startup.

use std::fs;
use std::path::Path;
use tracing::debug;

/// Directory holding container runtime host configuration.
pub const CONTAINERS_CONF_DIR: &str = "/etc/containers";

/// Marker that lets a Docker-compatible CLI run without the daemon notice.
pub const NODOCKER_MARKER: &str = "nodocker";

/// Touch the marker file if it is missing and its directory is writable.
/// Nothing here is fatal.
pub fn prepare_host() {
    prepare_host_in(Path::new(CONTAINERS_CONF_DIR));
}

pub fn prepare_host_in(conf_dir: &Path) {
    let marker = conf_dir.join(NODOCKER_MARKER);
    if marker.exists() || !is_writable(conf_dir) {
        return;
    }
    match fs::File::create(&marker) {
        Ok(_) => debug!(path = %marker.display(), "Created container marker"),
        Err(e) => debug!(path = %marker.display(), error = %e, "Could not create container marker"),
    }
}

#[cfg(target_os = "linux")]
fn is_writable(dir: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(dir, AccessFlags::W_OK).is_ok()
}

#[cfg(not(target_os = "linux"))]
fn is_writable(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}
