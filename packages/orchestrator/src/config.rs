// ABOUTME: Environment-driven configuration with validated fallbacks
// ABOUTME: Central env var name constants used across the Burrow packages

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable names
pub mod env {
    pub const BURROW_DATA_DIR: &str = "BURROW_DATA_DIR";
    pub const BURROW_API_PORT: &str = "BURROW_API_PORT";
    pub const BURROW_SANDBOX_IMAGE: &str = "BURROW_SANDBOX_IMAGE";
    pub const BURROW_PREVIEW_PORT: &str = "BURROW_PREVIEW_PORT";
    pub const BURROW_EXEC_TIMEOUT_SECS: &str = "BURROW_EXEC_TIMEOUT_SECS";
    pub const BURROW_SANDBOX_MEMORY_MB: &str = "BURROW_SANDBOX_MEMORY_MB";
    pub const BURROW_SANDBOX_CPU_SHARES: &str = "BURROW_SANDBOX_CPU_SHARES";
    pub const BURROW_SSE_HEARTBEAT_SECS: &str = "BURROW_SSE_HEARTBEAT_SECS";
}

const DEFAULT_API_PORT: u16 = 4801;
const DEFAULT_PREVIEW_PORT: u16 = 3000;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MEMORY_MB: u64 = 2048;
const DEFAULT_CPU_SHARES: i64 = 1024;
const DEFAULT_SSE_HEARTBEAT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all durable state: one storage directory per project lives
    /// under `<data_dir>/projects/`.
    pub data_dir: PathBuf,
    pub api_port: u16,
    /// Image sandboxes are created from.
    pub sandbox_image: String,
    /// Port the dev server listens on inside the sandbox.
    pub preview_port: u16,
    /// Hard ceiling on one-shot command execution.
    pub exec_timeout: Duration,
    pub sandbox_memory_mb: u64,
    pub sandbox_cpu_shares: i64,
    /// Heartbeat interval for server-push event streams.
    pub sse_heartbeat: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".burrow");

        Self {
            data_dir,
            api_port: DEFAULT_API_PORT,
            sandbox_image: "node:20-slim".to_string(),
            preview_port: DEFAULT_PREVIEW_PORT,
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            sandbox_memory_mb: DEFAULT_MEMORY_MB,
            sandbox_cpu_shares: DEFAULT_CPU_SHARES,
            sse_heartbeat: Duration::from_secs(DEFAULT_SSE_HEARTBEAT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            data_dir: read_env(env::BURROW_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_port: parse_env(env::BURROW_API_PORT).unwrap_or(defaults.api_port),
            sandbox_image: read_env(env::BURROW_SANDBOX_IMAGE).unwrap_or(defaults.sandbox_image),
            preview_port: parse_env(env::BURROW_PREVIEW_PORT).unwrap_or(defaults.preview_port),
            exec_timeout: parse_env(env::BURROW_EXEC_TIMEOUT_SECS)
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.exec_timeout),
            sandbox_memory_mb: parse_env(env::BURROW_SANDBOX_MEMORY_MB)
                .filter(|&mb: &u64| mb >= 128)
                .unwrap_or(defaults.sandbox_memory_mb),
            sandbox_cpu_shares: parse_env(env::BURROW_SANDBOX_CPU_SHARES)
                .unwrap_or(defaults.sandbox_cpu_shares),
            sse_heartbeat: parse_env(env::BURROW_SSE_HEARTBEAT_SECS)
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sse_heartbeat),
        }
    }

    /// Host-visible storage directory for a project, addressed
    /// deterministically from the project identifier.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join("projects").join(project_id)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    read_env(name).and_then(|v| v.parse().ok())
}
