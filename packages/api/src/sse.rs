// ABOUTME: Server-push event streams for storage watching and streamed exec
// ABOUTME: Heartbeats keep connections alive; client disconnects end forwarding cleanly

use crate::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use burrow_orchestrator::CommandExecutor;
use burrow_runtime::StreamType;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get("x-burrow-user")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("default")
        .to_string()
}

/// Watch the sandbox storage for external changes as an SSE stream. Ensures
/// the sandbox first so a fresh session can connect before pushing anything.
pub async fn watch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let orchestrator = state.registry.get_or_create(&user_id(&headers)).await;
    orchestrator.ensure(&project).await?;
    let mut events = orchestrator.watch().await?;
    let heartbeat = state.registry.config().sse_heartbeat;

    let stream = async_stream::stream! {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(sse_event) = Event::default().event("change").json_data(&event) {
                        yield Ok::<Event, Infallible>(sse_event);
                    }
                }
                // Slow consumer skipped some events; keep streaming
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "watch subscriber lagged");
                }
                // Watcher stopped (teardown or recreation)
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text("heartbeat"),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExecStreamRequest {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct ChunkPayload {
    stream: &'static str,
    data: String,
}

/// Run a command and stream its output incrementally. The final event
/// carries the exit code. Dropping the connection stops forwarding without
/// error; the command itself keeps running in the sandbox.
pub async fn exec_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_project): Path<String>,
    Json(request): Json<ExecStreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let orchestrator = state.registry.get_or_create(&user_id(&headers)).await;
    let executor = CommandExecutor::new(orchestrator);
    let heartbeat = state.registry.config().sse_heartbeat;

    let mut exec = executor
        .exec_stream(&request.command, request.working_dir, request.env)
        .await?;

    let stream = async_stream::stream! {
        while let Some(chunk) = exec.chunks.recv().await {
            let payload = ChunkPayload {
                stream: match chunk.stream {
                    StreamType::Stdout => "stdout",
                    StreamType::Stderr => "stderr",
                },
                data: String::from_utf8_lossy(&chunk.data).into_owned(),
            };
            if let Ok(event) = Event::default().event("output").json_data(&payload) {
                yield Ok::<Event, Infallible>(event);
            }
        }

        let exit_code = exec.exit_code.await.unwrap_or(0);
        if let Ok(event) =
            Event::default().event("exit").json_data(&serde_json::json!({ "exit_code": exit_code }))
        {
            yield Ok(event);
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text("heartbeat"),
    ))
}
