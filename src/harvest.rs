//! Draining allow-listed artifacts from the shared output directory.

use crate::types::OutputArtifact;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Largest file collected from the output directory (100 KiB).
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 10 * 10 * 1024;

/// Extensions eligible for collection, lower-case and without the dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "csv", "json", "png", "jpeg", "pdf", "xlsx", "docx",
];

/// Whether `filename`'s final extension is on the allow-list. Matching is
/// case-insensitive; a name without a dot never qualifies.
pub fn is_allowed(filename: &str) -> bool {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

pub fn mime_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Collect every allow-listed file of at most `max_bytes` under `output_dir`,
/// deleting each one once its content is in hand.
///
/// Files that fail the extension or size check stay where they are. A file
/// that cannot be read is left in place; a file that cannot be deleted is
/// left out of the result so it is never reported and kept at once.
pub fn harvest(output_dir: &Path, max_bytes: u64) -> Vec<OutputArtifact> {
    let mut artifacts = Vec::new();
    if !output_dir.is_dir() {
        return artifacts;
    }

    let mut entries: Vec<_> = WalkDir::new(output_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Error walking output directory");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let path = entry.path();
        let relative = match path.strip_prefix(output_dir) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };

        let name = entry.file_name().to_string_lossy();
        if !is_allowed(&name) {
            debug!(file = %relative, "Skipping file with disallowed extension");
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(file = %relative, error = %e, "Unable to stat output file");
                continue;
            }
        };
        if size > max_bytes {
            debug!(file = %relative, size, max_bytes, "Skipping oversized output file");
            continue;
        }

        let bytes = match read_capped(path, max_bytes) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(file = %relative, max_bytes, "Output file grew past the cap, skipping");
                continue;
            }
            Err(e) => {
                warn!(file = %relative, error = %e, "Error reading output file");
                continue;
            }
        };

        if let Err(e) = fs::remove_file(path) {
            warn!(file = %relative, error = %e, "Unable to remove harvested file, dropping it");
            continue;
        }

        artifacts.push(OutputArtifact {
            mime_type: mime_type(&name).to_string(),
            content: STANDARD.encode(&bytes),
            size: bytes.len() as u64,
            filename: relative,
        });
    }

    artifacts
}

/// Read at most `max_bytes` from `path`; `None` if the file holds more.
fn read_capped(path: &Path, max_bytes: u64) -> io::Result<Option<Vec<u8>>> {
    let mut bytes = Vec::new();
    File::open(path)?
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)?;
    if bytes.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(bytes))
}
