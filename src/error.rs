//! Error types for staging, launching and tearing down sandbox runs.

use std::io;
use std::path::PathBuf;

/// Failures raised inside the crate before they are folded into an
/// [`ExecutionResult`](crate::types::ExecutionResult).
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Creating or writing the per-run workspace failed
    #[error("workspace {}: {source}", path.display())]
    Workspace { path: PathBuf, source: io::Error },

    /// A shared input/output directory could not be prepared for mounting
    #[error("mount directory {}: {source}", path.display())]
    MountDir { path: PathBuf, source: io::Error },

    /// The runtime binary could not be spawned or waited on
    #[error("unable to run `{command}`: {source}")]
    Runtime { command: String, source: io::Error },

    /// The runtime ran but reported a failure
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A detached run printed no container identifier
    #[error("container runtime returned no container id")]
    MissingContainerId,

    /// Another in-flight request already owns this output directory
    #[error("output directory {} is already in use by another execution", .0.display())]
    OutputDirInUse(PathBuf),

    /// The prerequisite image could not be provisioned
    #[error("image {0} is unavailable")]
    ImageUnavailable(String),
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
