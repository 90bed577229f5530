// ABOUTME: JSON request handlers for sandbox lifecycle, files, exec, and engines
// ABOUTME: Caller identity comes from the authenticated layer via the x-burrow-user header

use crate::{ApiError, ApiResponse, AppState};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use burrow_engine::{EngineKind, EngineState};
use burrow_orchestrator::{CommandExecutor, Sandbox, SandboxOrchestrator};
use burrow_sanitizer::sanitize;
use burrow_sync::FileTree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const USER_HEADER: &str = "x-burrow-user";
const DEFAULT_USER: &str = "default";

/// The request layer upstream has already authenticated the caller; the
/// header carries its opaque identity.
fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

async fn orchestrator_for(
    state: &AppState,
    headers: &HeaderMap,
) -> Arc<SandboxOrchestrator> {
    state.registry.get_or_create(&user_id(headers)).await
}

pub async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(serde_json::json!({ "status": "ok" })))
}

pub async fn ensure_sandbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Sandbox>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    let sandbox = orchestrator.ensure(&project).await?;
    Ok(Json(ApiResponse::success(sandbox)))
}

pub async fn push_tree(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(tree): Json<FileTree>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.ensure(&project).await?;
    orchestrator.push(&tree).await?;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct FilePathQuery {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub contents: String,
}

pub async fn read_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> Result<Json<ApiResponse<FileContent>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    let bytes = orchestrator.read_file(&query.path).await?;
    Ok(Json(ApiResponse::success(FileContent {
        path: query.path,
        contents: String::from_utf8_lossy(&bytes).into_owned(),
    })))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.delete_file(&query.path).await?;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

pub async fn mkdir(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
    Json(request): Json<MkdirRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.mkdir(&request.path).await?;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecResponse {
    pub exit_code: i64,
    pub timed_out: bool,
    /// Sanitized report text handed to the agent in place of raw output.
    pub report: String,
}

pub async fn exec(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ApiResponse<ExecResponse>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    let executor = CommandExecutor::new(orchestrator);

    let outcome = executor
        .exec(&request.command, request.working_dir, request.env)
        .await?;

    let report = sanitize(
        &request.command,
        &outcome.stdout,
        &outcome.stderr,
        outcome.exit_code,
    );

    Ok(Json(ApiResponse::success(ExecResponse {
        exit_code: outcome.exit_code,
        timed_out: outcome.timed_out,
        report: report.render(),
    })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewUrl {
    pub url: String,
}

pub async fn resolve_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<PreviewUrl>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.ensure(&project).await?;
    let url = orchestrator.resolve_url().await?;
    Ok(Json(ApiResponse::success(PreviewUrl { url })))
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.pause().await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn unpause(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let orchestrator = orchestrator_for(&state, &headers).await;
    orchestrator.unpause().await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn teardown(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.registry.release(&user_id(&headers)).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn engine_state(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<EngineState>>, ApiError> {
    let engines = state.engines_for(&user_id(&headers)).await;
    Ok(Json(ApiResponse::success(engines.selector.state().await)))
}

#[derive(Debug, Deserialize)]
pub struct SelectEngineRequest {
    pub kind: EngineKind,
}

pub async fn engine_select(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SelectEngineRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let engines = state.engines_for(&user_id(&headers)).await;
    engines.selector.select(request.kind).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn engine_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(reported): Json<EngineState>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let engines = state.engines_for(&user_id(&headers)).await;
    engines.embedded.report_state(reported).await;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct DevServerRequest {
    pub command: String,
}

pub async fn start_dev_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DevServerRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let engines = state.engines_for(&user_id(&headers)).await;

    match engines.selector.active_kind().await {
        EngineKind::Container => engines.container.start_dev_server(&request.command).await?,
        EngineKind::Process => engines.process.start_dev_server(&request.command).await?,
        EngineKind::Embedded => {
            return Err(ApiError::BadRequest(
                "the embedded runtime runs its dev server client-side".to_string(),
            ))
        }
    }

    Ok(Json(ApiResponse::success(())))
}
