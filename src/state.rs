//! Shared application state for the HTTP server.

use crate::executor::Executor;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    /// Parent of the per-request output directories.
    pub output_root: PathBuf,
}

impl AppState {
    pub fn new(executor: Executor) -> Self {
        let output_root = executor.config().output_dir.clone();
        Self {
            executor: Arc::new(executor),
            output_root,
        }
    }

    pub fn request_output_dir(&self, request_id: &str) -> PathBuf {
        self.output_root.join(request_id)
    }
}
