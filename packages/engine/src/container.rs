// ABOUTME: Container backend: projects the orchestrator's sandbox as an engine
// ABOUTME: Dev server runs as a streamed exec; switching away pauses the sandbox

use crate::{
    last_build_error, Engine, EngineKind, EngineState, EngineStatus, LogLine, LogSource, Result,
};
use async_trait::async_trait;
use burrow_orchestrator::{CommandExecutor, SandboxOrchestrator, SandboxStatus};
use burrow_runtime::StreamType;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

/// Keep only the most recent log entries to bound memory
const LOG_CAPACITY: usize = 1000;

/// Server-managed sandbox backend. Status and preview URL are read through
/// the orchestrator on every call; the dev server is a streamed exec whose
/// output lands in a bounded log ring.
pub struct ContainerEngine {
    orchestrator: Arc<SandboxOrchestrator>,
    executor: CommandExecutor,
    logs: Arc<RwLock<VecDeque<LogLine>>>,
    dev_task: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerEngine {
    pub fn new(orchestrator: Arc<SandboxOrchestrator>) -> Self {
        let executor = CommandExecutor::new(Arc::clone(&orchestrator));
        Self {
            orchestrator,
            executor,
            logs: Arc::new(RwLock::new(VecDeque::new())),
            dev_task: Mutex::new(None),
        }
    }

    /// Launch the project's dev server inside the sandbox, streaming its
    /// output into the log ring. Replaces any previous dev server.
    pub async fn start_dev_server(&self, command: &str) -> Result<()> {
        let mut stream = self.executor.exec_stream(command, None, None).await?;

        push_log(
            &self.logs,
            LogSource::System,
            format!("starting dev server: {}", command),
        )
        .await;

        let logs = Arc::clone(&self.logs);
        let task = tokio::spawn(async move {
            while let Some(chunk) = stream.chunks.recv().await {
                let source = match chunk.stream {
                    StreamType::Stdout => LogSource::Stdout,
                    StreamType::Stderr => LogSource::Stderr,
                };
                let message = String::from_utf8_lossy(&chunk.data).into_owned();
                for line in message.lines().filter(|l| !l.trim().is_empty()) {
                    push_log(&logs, source, line.to_string()).await;
                }
            }
        });

        let mut slot = self.dev_task.lock().await;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn recent_logs(&self, limit: usize) -> Vec<LogLine> {
        let logs = self.logs.read().await;
        logs.iter().rev().take(limit).rev().cloned().collect()
    }
}

async fn push_log(logs: &RwLock<VecDeque<LogLine>>, source: LogSource, message: String) {
    let mut logs = logs.write().await;
    logs.push_back(LogLine {
        timestamp: Utc::now(),
        source,
        message,
    });
    if logs.len() > LOG_CAPACITY {
        logs.pop_front();
    }
}

#[async_trait]
impl Engine for ContainerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Container
    }

    async fn state(&self) -> EngineState {
        let status = match self.orchestrator.status() {
            SandboxStatus::Absent => EngineStatus::Idle,
            SandboxStatus::Creating | SandboxStatus::Recreating => EngineStatus::Starting,
            SandboxStatus::Running => EngineStatus::Running,
            SandboxStatus::Paused | SandboxStatus::Stopping => EngineStatus::Stopped,
        };

        let preview_url = if status == EngineStatus::Running {
            self.orchestrator.resolve_url().await.ok()
        } else {
            None
        };

        let logs: Vec<LogLine> = self.logs.read().await.iter().cloned().collect();
        let build_error = last_build_error(&logs);

        EngineState {
            status,
            preview_url,
            build_error,
            logs,
        }
    }

    async fn stop_dev_server(&self) -> Result<()> {
        let mut slot = self.dev_task.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
            info!("stopped container dev server stream");
        }
        // The sandbox itself stays around, paused, resumable on demand
        self.orchestrator.pause().await?;
        Ok(())
    }
}
