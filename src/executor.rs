//! Execution orchestration: stage, launch, await, harvest, clean up.

use crate::config::{ExecutorConfig, CONTAINER_CODE_DIR};
use crate::error::{Result, SandboxError};
use crate::harvest::harvest;
use crate::image::ImageProvisioner;
use crate::runtime::{ContainerRuntime, Mount, RunSpec};
use crate::types::{ExecutionRequest, ExecutionResult};
use crate::workspace::{Workspace, SCRIPT_NAME};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What cleanup knows about the container a run tried to start.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Launch {
    NotAttempted,
    /// `run` was issued but no identifier came back.
    Unidentified,
    Started(String),
}

/// Runs code submissions in throwaway containers.
///
/// Requests are independent and may be executed concurrently, provided each
/// one uses its own output directory.
pub struct Executor {
    runtime: Arc<dyn ContainerRuntime>,
    provisioner: ImageProvisioner,
    config: ExecutorConfig,
    claimed_outputs: Mutex<HashSet<PathBuf>>,
}

impl Executor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ExecutorConfig) -> Self {
        let provisioner = ImageProvisioner::new(runtime.clone());
        Self::with_provisioner(runtime, provisioner, config)
    }

    pub fn with_provisioner(
        runtime: Arc<dyn ContainerRuntime>,
        provisioner: ImageProvisioner,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runtime,
            provisioner,
            config,
            claimed_outputs: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn provisioner(&self) -> &ImageProvisioner {
        &self.provisioner
    }

    /// Run one submission to completion. Never fails: timeouts and
    /// infrastructure errors come back as [`ExecutionResult`] variants.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let result = match self.execute_claimed(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(image = %request.image, error = %e, "Execution failed");
                ExecutionResult::failed(e)
            }
        };

        if request.remove_image_after {
            self.provisioner.remove(&request.image).await;
        }
        result
    }

    async fn execute_claimed(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.output_dir.clone());
        let output_dir = prepare_output_dir(&absolute(&output_dir)?)?;
        let _claim = OutputClaim::acquire(&self.claimed_outputs, output_dir.clone())?;

        if self.config.ensure_image && !self.provisioner.ensure_built(&request.image, false).await {
            return Err(SandboxError::ImageUnavailable(request.image.clone()));
        }

        let mut workspace = Workspace::stage(&absolute(&self.config.workspace_root)?, &request.code)?;
        info!(token = %workspace.token(), image = %request.image, timeout_secs = request.timeout.as_secs_f64(), "Staged execution");

        let mut launch = Launch::NotAttempted;
        let outcome = self
            .launch_and_collect(request, &workspace, &output_dir, &mut launch)
            .await;

        self.reclaim_containers(&request.image, &launch).await;
        workspace.cleanup();
        outcome
    }

    async fn launch_and_collect(
        &self,
        request: &ExecutionRequest,
        workspace: &Workspace,
        output_dir: &Path,
        launch: &mut Launch,
    ) -> Result<ExecutionResult> {
        let input_dir = absolute(&self.config.input_dir)?;
        ensure_dir(&input_dir)?;

        let spec = self.run_spec(&request.image, workspace.code_dir(), input_dir, output_dir);

        *launch = Launch::Unidentified;
        let container_id = self.runtime.run_detached(&spec).await?;
        *launch = Launch::Started(container_id.clone());
        debug!(token = %workspace.token(), container = %container_id, "Container started");

        let exit_code = match tokio::time::timeout(request.timeout, self.runtime.wait(&container_id)).await {
            Ok(exit_code) => exit_code?,
            Err(_) => {
                warn!(token = %workspace.token(), container = %container_id, "Execution timeout exceeded");
                return Ok(ExecutionResult::timed_out());
            }
        };

        let logs = self.runtime.logs(&container_id).await?;
        let output_files = harvest(output_dir, self.config.max_artifact_bytes);
        info!(
            token = %workspace.token(),
            exit_code,
            stdout_len = logs.stdout.len(),
            stderr_len = logs.stderr.len(),
            artifacts = output_files.len(),
            "Execution finished"
        );

        Ok(ExecutionResult::completed(logs.stdout, logs.stderr, exit_code, output_files))
    }

    fn run_spec(&self, image: &str, code_dir: PathBuf, input_dir: PathBuf, output_dir: &Path) -> RunSpec {
        RunSpec {
            image: image.to_string(),
            mounts: vec![
                Mount::read_only(code_dir, CONTAINER_CODE_DIR),
                Mount::read_only(input_dir, ExecutorConfig::container_input_dir()),
                Mount::read_write(output_dir, ExecutorConfig::container_output_dir()),
            ],
            workdir: CONTAINER_CODE_DIR.to_string(),
            command: vec![
                self.config.interpreter.clone(),
                format!("{}/{}", CONTAINER_CODE_DIR, SCRIPT_NAME),
            ],
            cpu_seconds: self.config.cpu_seconds,
            tmpfs_size: self.config.tmpfs_size.clone(),
        }
    }

    /// Remove the run's container. Only when the launch never produced an
    /// identifier does this fall back to sweeping by image ancestry, which can
    /// also hit other runs of the same image.
    async fn reclaim_containers(&self, image: &str, launch: &Launch) {
        match launch {
            Launch::NotAttempted => {}
            Launch::Started(id) => {
                if let Err(e) = self.runtime.remove_container(id, true).await {
                    warn!(container = %id, error = %e, "Failed to remove container");
                }
            }
            Launch::Unidentified => self.sweep_by_ancestry(image).await,
        }
    }

    async fn sweep_by_ancestry(&self, image: &str) {
        let ids = match self.runtime.containers_by_ancestor(image).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(image, error = %e, "Unable to list containers for sweep");
                return;
            }
        };
        if ids.is_empty() {
            return;
        }

        warn!(image, count = ids.len(), "Sweeping containers by image ancestry");
        let runtime = &self.runtime;
        join_all(ids.iter().map(|id| async move {
            if let Err(e) = runtime.stop_container(id).await {
                warn!(container = %id, error = %e, "Failed to stop container");
            }
            if let Err(e) = runtime.remove_container(id, false).await {
                warn!(container = %id, error = %e, "Failed to remove container");
            }
        }))
        .await;
    }
}

/// Exclusive use of an output directory for the lifetime of one request.
///
/// Harvest walks the directory recursively, so a claim also conflicts with
/// any claimed ancestor or descendant of its path.
struct OutputClaim<'a> {
    claims: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> OutputClaim<'a> {
    fn acquire(claims: &'a Mutex<HashSet<PathBuf>>, path: PathBuf) -> Result<Self> {
        let mut claimed = claims.lock();
        if claimed
            .iter()
            .any(|held| held.starts_with(&path) || path.starts_with(held))
        {
            return Err(SandboxError::OutputDirInUse(path));
        }
        claimed.insert(path.clone());
        drop(claimed);
        Ok(Self { claims, path })
    }
}

impl Drop for OutputClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.path);
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|source| SandboxError::MountDir {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| SandboxError::MountDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Create the output directory if needed, open it to the container's
/// unprivileged user and return its canonical path.
fn prepare_output_dir(path: &Path) -> Result<PathBuf> {
    ensure_dir(path)?;
    let mount_err = |source: std::io::Error| SandboxError::MountDir {
        path: path.to_path_buf(),
        source,
    };
    fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(mount_err)?;
    fs::canonicalize(path).map_err(mount_err)
}
