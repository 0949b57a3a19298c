//! Run untrusted code in locked-down, throwaway Docker containers.
//!
//! [`executor::Executor`] stages a submission into a private workspace,
//! starts a container with no network, no capabilities and a read-only root,
//! waits for it under a wall-clock limit, collects allow-listed output files
//! and always tears the container and workspace down again.
//! [`image::ImageProvisioner`] builds and removes the sandbox image.

#[cfg(not(unix))]
compile_error!("code-interpreter only works on Unix hosts.");

pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod harvest;
pub mod http_server;
pub mod image;
pub mod runtime;
pub mod state;
pub mod types;
pub mod workspace;

pub use config::ExecutorConfig;
pub use error::{Result, SandboxError};
pub use executor::Executor;
pub use image::ImageProvisioner;
pub use runtime::{ContainerRuntime, DockerCli};
pub use types::{ExecutionRequest, ExecutionResult, OutputArtifact};
