// ABOUTME: Sandbox lifecycle orchestration: one sandbox per caller identity
// ABOUTME: Exposes the orchestrator state machine, command executor, and registry

pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod ports;
pub mod registry;

pub use config::Config;
pub use executor::{CommandExecutor, ExecOutcome, TIMEOUT_EXIT_CODE};
pub use orchestrator::{Sandbox, SandboxOrchestrator, SandboxStatus};
pub use registry::SandboxRegistry;

use burrow_runtime::ProviderError;
use burrow_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Any file or exec operation issued while no sandbox is bound.
    #[error("No sandbox available")]
    NoSandbox,

    #[error("Failed to allocate preview address")]
    PreviewUnavailable,

    #[error("Invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No free host port available")]
    NoFreePort,

    #[error("Sandbox creation failed: {0}")]
    CreateFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
