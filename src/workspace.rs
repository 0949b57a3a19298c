//! Per-run staging directories.

use crate::error::{Result, SandboxError};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File the submitted code is written to inside `code/`.
pub const SCRIPT_NAME: &str = "extracted_code.py";

/// Fresh tokens tried after a collision before staging gives up.
const TOKEN_ATTEMPTS: usize = 8;

/// A uniquely named directory tree owned by a single execution:
///
/// ```text
/// <root>/<token>/code/extracted_code.py
/// <root>/<token>/code/input/    (mount point)
/// <root>/<token>/code/output/   (mount point)
/// ```
///
/// The tree is removed by [`Workspace::cleanup`] or, failing that, on drop.
#[derive(Debug)]
pub struct Workspace {
    token: String,
    dir: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create a fresh workspace under `root` and stage `code` into it.
    pub fn stage(root: &Path, code: &str) -> Result<Self> {
        Self::stage_with(root, code, new_token)
    }

    fn stage_with(root: &Path, code: &str, mut next_token: impl FnMut() -> String) -> Result<Self> {
        fs::create_dir_all(root).map_err(|source| SandboxError::Workspace {
            path: root.to_path_buf(),
            source,
        })?;

        let mut attempts = 0;
        let (token, dir) = loop {
            let token = next_token();
            let dir = root.join(&token);
            match fs::create_dir(&dir) {
                Ok(()) => break (token, dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < TOKEN_ATTEMPTS => {
                    debug!(token = %token, "Workspace token already taken, retrying");
                    attempts += 1;
                }
                Err(source) => return Err(SandboxError::Workspace { path: dir, source }),
            }
        };
        // The token directory is ours; from here on, drop removes it.
        let workspace = Workspace {
            token,
            dir,
            removed: false,
        };

        let code_dir = workspace.code_dir();
        for sub in [code_dir.clone(), code_dir.join("input"), code_dir.join("output")] {
            fs::create_dir(&sub).map_err(|source| SandboxError::Workspace {
                path: sub.clone(),
                source,
            })?;
            set_mode(&sub, 0o755)?;
        }

        let script = workspace.script_path();
        fs::write(&script, code).map_err(|source| SandboxError::Workspace {
            path: script.clone(),
            source,
        })?;
        set_mode(&script, 0o644)?;

        debug!(token = %workspace.token, bytes = code.len(), "Staged workspace");
        Ok(workspace)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn code_dir(&self) -> PathBuf {
        self.dir.join("code")
    }

    pub fn script_path(&self) -> PathBuf {
        self.code_dir().join(SCRIPT_NAME)
    }

    /// Remove the whole tree. Failures are logged; the call never errors.
    pub fn cleanup(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(token = %self.token, "Removed workspace"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.dir.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        SandboxError::Workspace {
            path: path.to_path_buf(),
            source,
        }
    })
}
