//! Container runtime seam and its `docker` CLI implementation.

use crate::error::{Result, SandboxError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Upper bound for each stop/remove issued during cleanup.
pub const CLEANUP_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    fn volume_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// Everything needed to start one locked-down container.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub workdir: String,
    pub command: Vec<String>,
    /// CPU-time rlimit in seconds, independent of the wall-clock timeout.
    pub cpu_seconds: u64,
    /// Size of the writable `/tmp` tmpfs, e.g. `50m`.
    pub tmpfs_size: String,
}

impl RunSpec {
    /// Host path bound at `container`, if any.
    pub fn host_path_for(&self, container: &str) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|m| m.container == container)
            .map(|m| m.host.as_path())
    }
}

/// Captured stdout/stderr of a finished container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Operations the sandbox needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool>;
    async fn build_image(&self, image: &str, context: &Path) -> Result<()>;
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Start a detached container and return its identifier.
    async fn run_detached(&self, spec: &RunSpec) -> Result<String>;
    /// Block until the container exits and return its exit code.
    async fn wait(&self, container_id: &str) -> Result<i32>;
    async fn logs(&self, container_id: &str) -> Result<ContainerLogs>;
    async fn stop_container(&self, container_id: &str) -> Result<()>;
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;
    /// Running containers started from `image`.
    async fn containers_by_ancestor(&self, image: &str) -> Result<Vec<String>>;
}

/// Talks to Docker (or a CLI-compatible runtime) through its binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    async fn output(&self, args: &[String]) -> Result<Output> {
        debug!(command = %self.describe(args), "Invoking container runtime");
        self.command(args)
            .output()
            .await
            .map_err(|source| SandboxError::Runtime {
                command: self.describe(args),
                source,
            })
    }

    /// Runs the command and returns stdout, failing on a non-zero exit.
    async fn checked(&self, args: &[String]) -> Result<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(SandboxError::CommandFailed {
                command: self.describe(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn checked_with_deadline(&self, args: &[String]) -> Result<String> {
        match tokio::time::timeout(CLEANUP_COMMAND_TIMEOUT, self.checked(args)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::CommandFailed {
                command: self.describe(args),
                stderr: format!(
                    "no response within {}s",
                    CLEANUP_COMMAND_TIMEOUT.as_secs()
                ),
            }),
        }
    }
}

/// Arguments for `docker run` that enforce the sandbox's isolation.
pub fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--detach".into(),
        "--network".into(),
        "none".into(),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--ulimit".into(),
        format!("cpu={}:{}", spec.cpu_seconds, spec.cpu_seconds),
        "--read-only".into(),
        "--tmpfs".into(),
        format!("/tmp:rw,size={}", spec.tmpfs_size),
    ];
    for mount in &spec.mounts {
        args.push("--volume".into());
        args.push(mount.volume_arg());
    }
    args.push("--workdir".into());
    args.push(spec.workdir.clone());
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

fn non_empty_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let stdout = self
            .checked(&["images".to_string(), "-q".to_string(), image.to_string()])
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<()> {
        self.checked(&[
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            context.display().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.checked(&["rmi".to_string(), image.to_string()]).await?;
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String> {
        let stdout = self.checked(&run_args(spec)).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(SandboxError::MissingContainerId)
    }

    async fn wait(&self, container_id: &str) -> Result<i32> {
        let args = ["wait".to_string(), container_id.to_string()];
        let stdout = self.checked(&args).await?;
        stdout
            .trim()
            .parse()
            .map_err(|_| SandboxError::CommandFailed {
                command: self.describe(&args),
                stderr: format!("unexpected exit status {:?}", stdout.trim()),
            })
    }

    async fn logs(&self, container_id: &str) -> Result<ContainerLogs> {
        let args = ["logs".to_string(), container_id.to_string()];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(SandboxError::CommandFailed {
                command: self.describe(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // `docker logs` replays the container's streams onto its own.
        Ok(ContainerLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.checked_with_deadline(&["stop".to_string(), container_id.to_string()])
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(container_id.to_string());
        self.checked_with_deadline(&args).await?;
        Ok(())
    }

    async fn containers_by_ancestor(&self, image: &str) -> Result<Vec<String>> {
        let stdout = self
            .checked(&[
                "ps".to_string(),
                "-q".to_string(),
                "--filter".to_string(),
                format!("ancestor={}", image),
            ])
            .await?;
        Ok(non_empty_lines(&stdout))
    }
}
