// ABOUTME: Axum router exposing the sandbox orchestration layer over HTTP
// ABOUTME: JSON envelopes, typed error mapping, and SSE event streams

pub mod handlers;
pub mod sse;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use burrow_engine::{ContainerEngine, EmbeddedEngine, EngineKind, EngineSelector, ProcessEngine};
use burrow_orchestrator::{OrchestratorError, SandboxRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Uniform response envelope for every JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error<E: ToString>(error: E) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Engine(#[from] burrow_engine::EngineError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // The only failure texts that reach an end user are "no sandbox
        // available", "command timed out", and "failed to allocate preview
        // address"; everything else is internal detail behind a 500.
        let (status, message) = match &self {
            ApiError::Orchestrator(OrchestratorError::NoSandbox) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Orchestrator(OrchestratorError::PreviewUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Orchestrator(OrchestratorError::InvalidProjectId(_))
            | ApiError::Orchestrator(OrchestratorError::InvalidPath(_))
            | ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

/// The backends one caller can switch between, plus their selector.
pub struct UserEngines {
    pub selector: EngineSelector,
    pub embedded: Arc<EmbeddedEngine>,
    pub container: Arc<ContainerEngine>,
    pub process: Arc<ProcessEngine>,
}

pub struct AppState {
    pub registry: Arc<SandboxRegistry>,
    engines: RwLock<HashMap<String, Arc<UserEngines>>>,
}

impl AppState {
    pub fn new(registry: Arc<SandboxRegistry>) -> Self {
        Self {
            registry,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Engine set for a caller, created on first access with the container
    /// backend active.
    pub async fn engines_for(&self, user_id: &str) -> Arc<UserEngines> {
        {
            let engines = self.engines.read().await;
            if let Some(existing) = engines.get(user_id) {
                return Arc::clone(existing);
            }
        }

        let orchestrator = self.registry.get_or_create(user_id).await;
        let embedded = Arc::new(EmbeddedEngine::new());
        let container = Arc::new(ContainerEngine::new(orchestrator));
        let process = Arc::new(ProcessEngine::new(
            self.registry.config().data_dir.join("projects"),
        ));

        let selector = EngineSelector::new(
            vec![
                Arc::clone(&embedded) as Arc<dyn burrow_engine::Engine>,
                Arc::clone(&container) as Arc<dyn burrow_engine::Engine>,
                Arc::clone(&process) as Arc<dyn burrow_engine::Engine>,
            ],
            EngineKind::Container,
        );

        let user_engines = Arc::new(UserEngines {
            selector,
            embedded,
            container,
            process,
        });

        let mut engines = self.engines.write().await;
        Arc::clone(engines.entry(user_id.to_string()).or_insert(user_engines))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route(
            "/api/v1/sandboxes/{project}/ensure",
            post(handlers::ensure_sandbox),
        )
        .route("/api/v1/sandboxes/{project}/push", post(handlers::push_tree))
        .route(
            "/api/v1/sandboxes/{project}/file",
            get(handlers::read_file).delete(handlers::delete_file),
        )
        .route("/api/v1/sandboxes/{project}/mkdir", post(handlers::mkdir))
        .route("/api/v1/sandboxes/{project}/exec", post(handlers::exec))
        .route(
            "/api/v1/sandboxes/{project}/exec/stream",
            post(sse::exec_stream),
        )
        .route("/api/v1/sandboxes/{project}/watch", get(sse::watch))
        .route("/api/v1/sandboxes/{project}/url", get(handlers::resolve_url))
        .route("/api/v1/sandboxes/{project}/pause", post(handlers::pause))
        .route(
            "/api/v1/sandboxes/{project}/unpause",
            post(handlers::unpause),
        )
        .route(
            "/api/v1/sandboxes/{project}",
            delete(handlers::teardown),
        )
        .route("/api/v1/engine", get(handlers::engine_state))
        .route("/api/v1/engine/select", post(handlers::engine_select))
        .route("/api/v1/engine/report", post(handlers::engine_report))
        .route(
            "/api/v1/engine/dev-server",
            post(handlers::start_dev_server),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
