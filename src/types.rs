//! Request and result types shared by the executor, CLI and HTTP server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Image used when a request does not name one.
pub const DEFAULT_IMAGE: &str = "python-sandbox";

/// Wall-clock limit applied when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Exit code reported when the wall-clock limit expires.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the run could not be carried out at all.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// A single code submission.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub timeout: Duration,
    pub image: String,
    /// Overrides the executor's configured output directory for this run.
    pub output_dir: Option<PathBuf>,
    /// Remove the image once the run has been cleaned up.
    pub remove_image_after: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: DEFAULT_TIMEOUT,
            image: DEFAULT_IMAGE.to_string(),
            output_dir: None,
            remove_image_after: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn remove_image_after(mut self, remove: bool) -> Self {
        self.remove_image_after = remove;
        self
    }
}

/// A file collected from the output directory after the container exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    /// Path relative to the output directory, `/`-separated.
    pub filename: String,
    /// Standard base64 of the file bytes.
    pub content: String,
    pub size: u64,
    pub mime_type: String,
}

/// Output of a run that reached the container's exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub output_files: Vec<OutputArtifact>,
}

/// Outcome of [`Executor::execute`](crate::executor::Executor::execute).
///
/// Serialized untagged: a completed run is
/// `{stdout, stderr, exit_code, success, output_files}` and both failure
/// kinds are `{error, exit_code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Completed(CompletedRun),
    TimedOut { error: String, exit_code: i32 },
    Failed { error: String, exit_code: i32 },
}

impl ExecutionResult {
    pub fn completed(
        stdout: String,
        stderr: String,
        exit_code: i32,
        output_files: Vec<OutputArtifact>,
    ) -> Self {
        ExecutionResult::Completed(CompletedRun {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
            output_files,
        })
    }

    pub fn timed_out() -> Self {
        ExecutionResult::TimedOut {
            error: "Execution timeout exceeded".to_string(),
            exit_code: TIMEOUT_EXIT_CODE,
        }
    }

    pub fn failed(cause: impl std::fmt::Display) -> Self {
        ExecutionResult::Failed {
            error: format!("Execution failed: {}", cause),
            exit_code: FAILURE_EXIT_CODE,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionResult::Completed(run) => run.exit_code,
            ExecutionResult::TimedOut { exit_code, .. } => *exit_code,
            ExecutionResult::Failed { exit_code, .. } => *exit_code,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExecutionResult::Completed(run) if run.success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Completed(_) => None,
            ExecutionResult::TimedOut { error, .. } | ExecutionResult::Failed { error, .. } => {
                Some(error)
            }
        }
    }

    pub fn as_completed(&self) -> Option<&CompletedRun> {
        match self {
            ExecutionResult::Completed(run) => Some(run),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completed_result_serializes_flat() {
        let result = ExecutionResult::completed("hi\n".into(), String::new(), 0, vec![]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "stdout": "hi\n",
                "stderr": "",
                "exit_code": 0,
                "success": true,
                "output_files": []
            })
        );
    }

    #[test]
    fn timeout_result_has_error_shape() {
        let value = serde_json::to_value(ExecutionResult::timed_out()).unwrap();
        assert_eq!(
            value,
            json!({"error": "Execution timeout exceeded", "exit_code": 124})
        );
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let result = ExecutionResult::completed(String::new(), "boom".into(), 2, vec![]);
        assert!(!result.success());
        assert_eq!(result.exit_code(), 2);
        assert!(result.error().is_none());
    }

    #[test]
    fn failed_result_prefixes_cause() {
        let result = ExecutionResult::failed("disk full");
        assert_eq!(result.error(), Some("Execution failed: disk full"));
        assert_eq!(result.exit_code(), FAILURE_EXIT_CODE);
    }

    #[test]
    fn request_defaults() {
        let req = ExecutionRequest::new("print(1)");
        assert_eq!(req.timeout, Duration::from_secs(120));
        assert_eq!(req.image, DEFAULT_IMAGE);
        assert!(req.output_dir.is_none());
        assert!(!req.remove_image_after);
    }
}
