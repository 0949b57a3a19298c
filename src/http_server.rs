//! HTTP server implementation using Axum.

use crate::state::AppState;
use crate::types::{ExecutionRequest, ExecutionResult, DEFAULT_IMAGE};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// Request/Response types
#[derive(Deserialize)]
struct ExecuteBody {
    code: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_image")]
    image: String,
}

fn default_timeout_ms() -> u64 { 120_000 }
fn default_image() -> String { DEFAULT_IMAGE.to_string() }

#[derive(Deserialize)]
struct BuildImageBody {
    #[serde(default = "default_image")]
    name: String,
    #[serde(default)]
    force_rebuild: bool,
}

#[derive(Serialize)]
struct ImageStatus {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
}

/// Routes served by [`run_server`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/images", post(build_image))
        .route("/images/:name", get(image_exists).delete(remove_image))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

async fn health() -> &'static str {
    "OK"
}

/// Every request gets its own output directory. It is removed once the
/// result has been assembled, unless harvest left files behind in it.
async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> Json<ExecutionResult> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let output_dir = state.request_output_dir(&request_id);
    info!("POST /execute - request {} image {}", request_id, body.image);

    let request = ExecutionRequest::new(body.code)
        .with_timeout(Duration::from_millis(body.timeout_ms))
        .with_image(body.image)
        .with_output_dir(&output_dir);
    let result = state.executor.execute(&request).await;

    match tokio::fs::remove_dir(&output_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "POST /execute - keeping {} with unharvested files: {}",
            output_dir.display(),
            e
        ),
    }

    info!("POST /execute - request {} exit={}", request_id, result.exit_code());
    Json(result)
}

async fn build_image(
    State(state): State<AppState>,
    Json(body): Json<BuildImageBody>,
) -> Json<ImageStatus> {
    info!("POST /images - {} (force={})", body.name, body.force_rebuild);
    let success = state
        .executor
        .provisioner()
        .ensure_built(&body.name, body.force_rebuild)
        .await;
    Json(ImageStatus {
        image: body.name,
        success: Some(success),
        exists: None,
    })
}

async fn image_exists(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<ImageStatus> {
    let exists = state.executor.provisioner().exists(&name).await;
    Json(ImageStatus {
        image: name,
        success: None,
        exists: Some(exists),
    })
}

async fn remove_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<ImageStatus> {
    info!("DELETE /images/{}", name);
    let success = state.executor.provisioner().remove(&name).await;
    Json(ImageStatus {
        image: name,
        success: Some(success),
        exists: None,
    })
}
