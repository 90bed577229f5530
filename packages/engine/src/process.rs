// ABOUTME: Native process backend: spawns the dev server directly on the host
// ABOUTME: Captures its output line by line and detects the serving port from logs

use crate::{
    last_build_error, Engine, EngineError, EngineKind, EngineState, EngineStatus, LogLine,
    LogSource, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const LOG_CAPACITY: usize = 1000;

/// Dev servers announce their address in many dialects; any localhost URL
/// in a log line counts.
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Local:\s+http://localhost:(\d+)",
        r"ready - started server on .*:(\d+)",
        r"server running on port (\d+)",
        r"http://localhost:(\d+)",
        r"localhost:(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn extract_port_from_log(line: &str) -> Option<u16> {
    for pattern in PORT_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(line) {
            if let Some(port) = captures.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                return Some(port);
            }
        }
    }
    None
}

/// Runs the dev server as a native host process, the desktop-app variant of
/// the sandbox. Output is captured into a bounded ring; the preview URL is
/// taken from the server's own startup lines.
pub struct ProcessEngine {
    project_root: PathBuf,
    child: Mutex<Option<Child>>,
    status: RwLock<EngineStatus>,
    preview_url: Arc<RwLock<Option<String>>>,
    logs: Arc<RwLock<VecDeque<LogLine>>>,
}

impl ProcessEngine {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            child: Mutex::new(None),
            status: RwLock::new(EngineStatus::Idle),
            preview_url: Arc::new(RwLock::new(None)),
            logs: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Spawn `command` in the project root, replacing any previous dev
    /// server process.
    pub async fn start_dev_server(&self, command: &str) -> Result<()> {
        self.stop_dev_server().await?;

        info!(command, root = %self.project_root.display(), "spawning dev server");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(stdout) = child.stdout.take() {
            self.capture_lines(stdout, LogSource::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.capture_lines(stderr, LogSource::Stderr);
        }

        *self.child.lock().await = Some(child);
        *self.status.write().await = EngineStatus::Running;
        Ok(())
    }

    fn capture_lines(
        &self,
        reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
        source: LogSource,
    ) {
        let logs = Arc::clone(&self.logs);
        let preview_url = Arc::clone(&self.preview_url);

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(port) = extract_port_from_log(&line) {
                    let url = format!("http://localhost:{}", port);
                    let mut slot = preview_url.write().await;
                    if slot.as_deref() != Some(url.as_str()) {
                        info!(%url, "dev server announced its address");
                        *slot = Some(url);
                    }
                }

                let mut logs = logs.write().await;
                logs.push_back(LogLine {
                    timestamp: Utc::now(),
                    source,
                    message: line,
                });
                if logs.len() > LOG_CAPACITY {
                    logs.pop_front();
                }
            }
        });
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Process
    }

    async fn state(&self) -> EngineState {
        let status = *self.status.read().await;
        let preview_url = if status == EngineStatus::Running {
            self.preview_url.read().await.clone()
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
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to kill dev server process: {}", e);
            }
            *self.status.write().await = EngineStatus::Stopped;
        }
        Ok(())
    }
}
