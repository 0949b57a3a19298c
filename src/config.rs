//! Executor configuration.

use crate::harvest::DEFAULT_MAX_ARTIFACT_BYTES;
use serde::Deserialize;
use std::path::PathBuf;

/// Mount point of the staged code inside the container.
pub const CONTAINER_CODE_DIR: &str = "/sandbox/code";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Shared directory mounted read-only at `/sandbox/code/input`.
    pub input_dir: PathBuf,
    /// Shared directory mounted read-write at `/sandbox/code/output`,
    /// unless a request brings its own.
    pub output_dir: PathBuf,
    /// Parent of the per-run workspaces.
    pub workspace_root: PathBuf,
    /// CPU-time ulimit, in seconds.
    pub cpu_seconds: u64,
    /// Size of the container's writable `/tmp`.
    pub tmpfs_size: String,
    pub max_artifact_bytes: u64,
    pub interpreter: String,
    /// Build the request's image before running if it is missing.
    pub ensure_image: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("code-interpreter");
        Self {
            input_dir: base.join("input"),
            output_dir: base.join("output"),
            workspace_root: base.join("workspaces"),
            cpu_seconds: 30,
            tmpfs_size: "50m".to_string(),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            interpreter: "python".to_string(),
            ensure_image: false,
        }
    }
}

impl ExecutorConfig {
    pub fn container_input_dir() -> String {
        format!("{}/input", CONTAINER_CODE_DIR)
    }

    pub fn container_output_dir() -> String {
        format!("{}/output", CONTAINER_CODE_DIR)
    }
}
