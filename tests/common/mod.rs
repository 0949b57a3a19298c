//! Scripted in-process container runtime shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use code_interpreter::config::CONTAINER_CODE_DIR;
use code_interpreter::error::{Result, SandboxError};
use code_interpreter::runtime::{ContainerLogs, ContainerRuntime, RunSpec};
use code_interpreter::workspace::SCRIPT_NAME;
use code_interpreter::ExecutorConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// What the next container does.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Files written into the output mount, relative path and contents.
    pub files: Vec<(String, Vec<u8>)>,
    /// Never exits on its own.
    pub hang: bool,
    /// `run` fails with this message before any container exists.
    pub launch_error: Option<String>,
    /// A container is created but `run` never reports its identifier.
    pub lose_id: bool,
}

impl Behavior {
    pub fn prints(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn raises(stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: 1,
            ..Default::default()
        }
    }

    pub fn writes(files: &[(&str, Vec<u8>)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, bytes)| (name.to_string(), bytes.clone()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn hangs() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Container {
    image: String,
    behavior: Behavior,
}

#[derive(Default)]
pub struct FakeRuntime {
    queue: Mutex<VecDeque<Behavior>>,
    containers: Mutex<HashMap<String, Container>>,
    next_id: AtomicUsize,

    pub images: Mutex<HashSet<String>>,
    pub builds: AtomicUsize,
    pub removed_images: Mutex<Vec<String>>,
    pub fail_builds: AtomicBool,
    pub fail_queries: AtomicBool,

    pub specs: Mutex<Vec<RunSpec>>,
    /// Script contents as seen at launch time.
    pub scripts: Mutex<Vec<String>>,
    pub force_removed: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub ancestor_queries: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(image: &str) -> Self {
        let runtime = Self::default();
        runtime.images.lock().insert(image.to_string());
        runtime
    }

    pub fn push(&self, behavior: Behavior) {
        self.queue.lock().push_back(behavior);
    }

    /// Start a container that no request owns.
    pub fn seed_container(&self, image: &str) -> String {
        let id = self.allocate_id();
        self.containers.lock().insert(
            id.clone(),
            Container {
                image: image.to_string(),
                behavior: Behavior::hangs(),
            },
        );
        id
    }

    pub fn live_containers(&self, image: &str) -> usize {
        self.containers
            .lock()
            .values()
            .filter(|c| c.image == image)
            .count()
    }

    pub fn last_spec(&self) -> RunSpec {
        self.specs.lock().last().cloned().expect("no container was launched")
    }

    /// Host directory of the workspace's code area for the last launch.
    pub fn last_code_dir(&self) -> PathBuf {
        self.last_spec()
            .host_path_for(CONTAINER_CODE_DIR)
            .expect("code mount")
            .to_path_buf()
    }

    fn allocate_id(&self) -> String {
        format!("c{:04}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(SandboxError::CommandFailed {
                command: "images".into(),
                stderr: "daemon not reachable".into(),
            });
        }
        Ok(self.images.lock().contains(image))
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(SandboxError::CommandFailed {
                command: format!("build -t {} {}", image, context.display()),
                stderr: "failed to solve".into(),
            });
        }
        self.images.lock().insert(image.to_string());
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        if !self.images.lock().remove(image) {
            return Err(SandboxError::CommandFailed {
                command: format!("rmi {}", image),
                stderr: "No such image".into(),
            });
        }
        self.removed_images.lock().push(image.to_string());
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String> {
        self.specs.lock().push(spec.clone());
        let behavior = self.queue.lock().pop_front().unwrap_or_default();

        if let Some(message) = behavior.launch_error.clone() {
            return Err(SandboxError::CommandFailed {
                command: "run".into(),
                stderr: message,
            });
        }

        let code_dir = spec.host_path_for(CONTAINER_CODE_DIR).expect("code mount");
        let script = fs::read_to_string(code_dir.join(SCRIPT_NAME)).expect("staged script");
        self.scripts.lock().push(script);

        let output_dir = spec
            .host_path_for(&ExecutorConfig::container_output_dir())
            .expect("output mount")
            .to_path_buf();
        for (name, bytes) in &behavior.files {
            let path = output_dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("output subdir");
            }
            fs::write(path, bytes).expect("output file");
        }

        let id = self.allocate_id();
        let lose_id = behavior.lose_id;
        self.containers.lock().insert(
            id.clone(),
            Container {
                image: spec.image.clone(),
                behavior,
            },
        );
        if lose_id {
            return Err(SandboxError::MissingContainerId);
        }
        Ok(id)
    }

    async fn wait(&self, container_id: &str) -> Result<i32> {
        let behavior = self
            .containers
            .lock()
            .get(container_id)
            .map(|c| c.behavior.clone());
        match behavior {
            Some(b) if b.hang => std::future::pending().await,
            Some(b) => Ok(b.exit_code),
            None => Err(SandboxError::CommandFailed {
                command: format!("wait {}", container_id),
                stderr: "No such container".into(),
            }),
        }
    }

    async fn logs(&self, container_id: &str) -> Result<ContainerLogs> {
        let containers = self.containers.lock();
        let c = containers
            .get(container_id)
            .ok_or_else(|| SandboxError::CommandFailed {
                command: format!("logs {}", container_id),
                stderr: "No such container".into(),
            })?;
        Ok(ContainerLogs {
            stdout: c.behavior.stdout.clone(),
            stderr: c.behavior.stderr.clone(),
        })
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.stopped.lock().push(container_id.to_string());
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        if force {
            self.force_removed.lock().push(container_id.to_string());
        }
        self.containers.lock().remove(container_id);
        Ok(())
    }

    async fn containers_by_ancestor(&self, image: &str) -> Result<Vec<String>> {
        self.ancestor_queries.fetch_add(1, Ordering::SeqCst);
        let mut ids: Vec<String> = self
            .containers
            .lock()
            .iter()
            .filter(|(_, c)| c.image == image)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Temporary input/output/workspace directories for one test.
pub struct Dirs {
    _root: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub workspaces: PathBuf,
}

impl Dirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let input = root.path().join("input");
        let output = root.path().join("output");
        let workspaces = root.path().join("workspaces");
        for dir in [&input, &output, &workspaces] {
            fs::create_dir_all(dir).expect("mkdir");
        }
        Self {
            _root: root,
            input,
            output,
            workspaces,
        }
    }

    pub fn config(&self) -> ExecutorConfig {
        ExecutorConfig {
            input_dir: self.input.clone(),
            output_dir: self.output.clone(),
            workspace_root: self.workspaces.clone(),
            ..ExecutorConfig::default()
        }
    }

    pub fn output_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = walkdir::WalkDir::new(&self.output)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(&self.output).unwrap().display().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn workspace_count(&self) -> usize {
        fs::read_dir(&self.workspaces).map(|d| d.count()).unwrap_or(0)
    }
}
