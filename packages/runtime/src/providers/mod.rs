// ABOUTME: Provider trait and shared types for sandbox container backends
// ABOUTME: Defines the abstract interface for container lifecycle, exec, and archive transfer

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Host port already in use: {0}")]
    PortInUse(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container already in requested state: {0}")]
    AlreadyInState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// True for conditions the orchestration layer treats as idempotent
    /// no-ops: stopping an already-stopped container, removing an
    /// already-removed one, starting one that is already running.
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_) | ProviderError::AlreadyInState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for creating sandboxes
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub project_id: String,
    pub env_vars: HashMap<String, String>,
    pub binds: Vec<BindMount>,
    pub ports: Vec<PortMapping>,
    pub memory_mb: u64,
    pub cpu_shares: i64,
    /// "uid:gid" to run the container process as, so files written onto a
    /// bind mount stay writable from outside the sandbox.
    pub user: Option<String>,
    pub working_dir: String,
}

#[derive(Debug, Clone)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Container runtime information
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub ports: HashMap<u16, u16>, // container_port -> host_port
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Stopping,
    Stopped,
    Removing,
    Dead,
    Unknown(String),
}

/// Buffered result of running a command in a container
#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// Incremental output of a streaming exec. `chunks` yields output as it
/// arrives; `exit_code` resolves once the underlying stream has ended.
pub struct ExecStream {
    pub chunks: tokio::sync::mpsc::UnboundedReceiver<OutputChunk>,
    pub exit_code: tokio::sync::oneshot::Receiver<i64>,
}

/// Provider trait for sandbox container backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the provider is available and configured correctly
    async fn is_available(&self) -> Result<bool>;

    /// Create and start a new container, returning its runtime id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Start a stopped container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a running container gracefully
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Suspend all processes in a running container
    async fn pause_container(&self, container_id: &str) -> Result<()>;

    /// Resume a paused container
    async fn unpause_container(&self, container_id: &str) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// Get container information, including the live port map
    async fn container_info(&self, container_id: &str) -> Result<ContainerInfo>;

    /// List all containers carrying this provider's management label
    async fn list_managed(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>>;

    /// Execute a command and buffer its output until completion
    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult>;

    /// Execute a command, yielding output incrementally
    async fn exec_streamed(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecStream>;

    /// Upload a tar archive into the container at `dest_path`
    async fn put_archive(&self, container_id: &str, dest_path: &str, tar_data: Vec<u8>)
        -> Result<()>;

    /// Pull an image if it doesn't exist locally
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;
}
