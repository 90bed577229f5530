// ABOUTME: Uniform facade over interchangeable sandbox backends
// ABOUTME: Observable state is always a read-through of the active backend

pub mod container;
pub mod embedded;
pub mod process;
pub mod selector;

pub use container::ContainerEngine;
pub use embedded::EmbeddedEngine;
pub use process::ProcessEngine;
pub use selector::EngineSelector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Dev server is not running")]
    DevServerNotRunning,

    #[error("Failed to spawn dev server '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error(transparent)]
    Orchestrator(#[from] burrow_orchestrator::OrchestratorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// The sandbox backend a session runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-browser ephemeral runtime; state is whatever the client reports.
    Embedded,
    /// Server-managed container sandbox.
    Container,
    /// Native process on the host machine.
    Process,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Embedded => "embedded",
            EngineKind::Container => "container",
            EngineKind::Process => "process",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub message: String,
}

/// Snapshot of everything downstream observers can see about a backend.
/// Recomputed on every read, never cached across backend switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub status: EngineStatus,
    pub preview_url: Option<String>,
    pub build_error: Option<String>,
    pub logs: Vec<LogLine>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: EngineStatus::Idle,
            preview_url: None,
            build_error: None,
            logs: Vec::new(),
        }
    }
}

/// One sandbox backend. Switching away stops its long-running dev process
/// but leaves the backend resumable.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Current observable state, computed fresh on every call.
    async fn state(&self) -> EngineState;

    /// Stop the backend's long-running dev process without destroying the
    /// backend itself.
    async fn stop_dev_server(&self) -> Result<()>;
}

/// Most recent log line that reads like a build failure, if any.
pub(crate) fn last_build_error(logs: &[LogLine]) -> Option<String> {
    logs.iter()
        .rev()
        .find(|line| {
            let lower = line.message.to_lowercase();
            lower.contains("error") || lower.contains("failed to compile")
        })
        .map(|line| line.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_picks_the_most_recent_match() {
        let line = |msg: &str| LogLine {
            timestamp: Utc::now(),
            source: LogSource::Stderr,
            message: msg.to_string(),
        };

        let logs = vec![
            line("starting"),
            line("Error: first failure"),
            line("recovered"),
            line("ERROR: second failure"),
        ];
        assert_eq!(
            last_build_error(&logs).as_deref(),
            Some("ERROR: second failure")
        );
        assert_eq!(last_build_error(&[line("all fine")]), None);
    }
}
