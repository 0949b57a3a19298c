//! Sandbox image provisioning.
//!
//! Every operation reports a plain `bool`; runtime errors are logged here and
//! never reach the caller.

use crate::runtime::ContainerRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build context shipped next to the crate manifest.
pub fn default_build_context() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("sandbox-image")
}

#[derive(Clone)]
pub struct ImageProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    build_context: PathBuf,
}

impl ImageProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_build_context(runtime, default_build_context())
    }

    pub fn with_build_context(
        runtime: Arc<dyn ContainerRuntime>,
        build_context: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            build_context: build_context.into(),
        }
    }

    pub fn build_context(&self) -> &Path {
        &self.build_context
    }

    /// Make sure `image` is present, building it unless it already exists
    /// and no rebuild was asked for.
    pub async fn ensure_built(&self, image: &str, force_rebuild: bool) -> bool {
        if !force_rebuild && self.exists(image).await {
            debug!(image, "Image already present, skipping build");
            return true;
        }

        info!(image, context = %self.build_context.display(), force_rebuild, "Building sandbox image");
        match self.runtime.build_image(image, &self.build_context).await {
            Ok(()) => {
                info!(image, "Sandbox image built");
                true
            }
            Err(e) => {
                warn!(image, error = %e, "Failed to build image");
                false
            }
        }
    }

    /// Whether the local store holds `image`. An unanswerable query counts as
    /// absent so that provisioning falls through to a build.
    pub async fn exists(&self, image: &str) -> bool {
        match self.runtime.image_exists(image).await {
            Ok(present) => present,
            Err(e) => {
                debug!(image, error = %e, "Image query failed, treating as absent");
                false
            }
        }
    }

    pub async fn remove(&self, image: &str) -> bool {
        match self.runtime.remove_image(image).await {
            Ok(()) => {
                info!(image, "Removed sandbox image");
                true
            }
            Err(e) => {
                warn!(image, error = %e, "Failed to remove image");
                false
            }
        }
    }
}
