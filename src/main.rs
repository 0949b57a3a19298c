//! code-interpreter - run untrusted code in throwaway Docker containers.
//!
//! Usage:
//!   code-interpreter serve [--port 8080]            # Start HTTP server
//!   code-interpreter run --file script.py           # One-off execution
//!   code-interpreter image build [--force]          # Provision the sandbox image

use clap::{Parser, Subcommand};
use code_interpreter::environment;
use code_interpreter::http_server;
use code_interpreter::image::{default_build_context, ImageProvisioner};
use code_interpreter::runtime::{ContainerRuntime, DockerCli};
use code_interpreter::state::AppState;
use code_interpreter::types::DEFAULT_IMAGE;
use code_interpreter::{ExecutionRequest, Executor, ExecutorConfig};
use std::io::Read;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "code-interpreter")]
#[command(about = "Run untrusted code in locked-down Docker containers")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory mounted read-only at /sandbox/code/input
    #[arg(long, global = true, env = "SANDBOX_INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Directory mounted read-write at /sandbox/code/output
    #[arg(long, global = true, env = "SANDBOX_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Parent directory for per-run workspaces
    #[arg(long, global = true, env = "SANDBOX_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Directory holding the sandbox image's Dockerfile
    #[arg(long, global = true, env = "SANDBOX_BUILD_CONTEXT")]
    build_context: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, global = true, env = "SANDBOX_DOCKER_BIN", default_value = "docker")]
    docker: PathBuf,

    /// CPU time limit in seconds
    #[arg(long, global = true, default_value = "30")]
    cpu_seconds: u64,

    /// Build the image before running if it is missing
    #[arg(long, global = true, env = "SANDBOX_ENSURE_IMAGE")]
    ensure_image: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Execute code once and print the result as JSON
    Run {
        /// Script to execute
        #[arg(long, conflicts_with = "code")]
        file: Option<PathBuf>,

        /// Inline code; read from stdin when neither this nor --file is given
        #[arg(long)]
        code: Option<String>,

        /// Wall-clock timeout in seconds
        #[arg(long, default_value = "120")]
        timeout: u64,

        #[arg(long, default_value = DEFAULT_IMAGE)]
        image: String,

        /// Remove the image after the run
        #[arg(long)]
        remove_image: bool,
    },
    /// Manage the sandbox image
    Image {
        #[command(subcommand)]
        action: ImageCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Build the image unless it already exists
    Build {
        #[arg(long, default_value = DEFAULT_IMAGE)]
        name: String,

        /// Rebuild even if the image is present
        #[arg(long)]
        force: bool,
    },
    /// Exit 0 if the image exists, 1 otherwise
    Exists {
        #[arg(long, default_value = DEFAULT_IMAGE)]
        name: String,
    },
    /// Remove the image
    Remove {
        #[arg(long, default_value = DEFAULT_IMAGE)]
        name: String,
    },
}

impl Args {
    fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.workspace_root {
            config.workspace_root = dir.clone();
        }
        config.cpu_seconds = self.cpu_seconds;
        config.ensure_image = self.ensure_image;
        config
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    environment::prepare_host();

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::with_binary(&args.docker));
    let build_context = args.build_context.clone().unwrap_or_else(default_build_context);
    let provisioner = ImageProvisioner::with_build_context(runtime.clone(), build_context);
    let config = args.executor_config();

    match args.command {
        Commands::Serve { port } => {
            let executor = Executor::with_provisioner(runtime, provisioner, config);
            if let Err(e) = http_server::run_server(port, AppState::new(executor)).await {
                eprintln!("Error: server failed: {}", e);
                exit(1);
            }
        }
        Commands::Run {
            file,
            code,
            timeout,
            image,
            remove_image,
        } => {
            let code = match read_code(file, code) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: unable to read code: {}", e);
                    exit(1);
                }
            };
            let executor = Executor::with_provisioner(runtime, provisioner, config);
            let request = ExecutionRequest::new(code)
                .with_timeout(Duration::from_secs(timeout))
                .with_image(image)
                .remove_image_after(remove_image);
            let result = executor.execute(&request).await;
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: unable to encode result: {}", e),
            }
            exit(result.exit_code());
        }
        Commands::Image { action } => {
            let ok = match action {
                ImageCommand::Build { name, force } => provisioner.ensure_built(&name, force).await,
                ImageCommand::Exists { name } => provisioner.exists(&name).await,
                ImageCommand::Remove { name } => provisioner.remove(&name).await,
            };
            exit(if ok { 0 } else { 1 });
        }
    }
}

fn read_code(file: Option<PathBuf>, code: Option<String>) -> std::io::Result<String> {
    match (file, code) {
        (Some(path), _) => std::fs::read_to_string(path),
        (None, Some(code)) => Ok(code),
        (None, None) => {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            Ok(code)
        }
    }
}
