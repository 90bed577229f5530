// ABOUTME: Per-identity sandbox state machine over a container provider
// ABOUTME: Guarantees one live sandbox matching the requested project, recreated safely

use crate::config::Config;
use crate::ports;
use crate::{OrchestratorError, Result};
use burrow_runtime::{
    BindMount, ContainerConfig, ContainerStatus, PortMapping, Provider, ProviderError,
};
use burrow_sync::{FileSyncEngine, FileTree, WatchEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

/// In-container project root every sandbox mounts its storage at.
pub const CONTAINER_PROJECT_ROOT: &str = "/workspace";

/// Attempts to read the port mapping after start before giving up.
const URL_RESOLVE_ATTEMPTS: u32 = 3;
const URL_RESOLVE_BACKOFF: Duration = Duration::from_millis(250);

/// Grace period for stopping a container before the runtime kills it.
const STOP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Absent,
    Creating,
    Running,
    Paused,
    Stopping,
    Recreating,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Absent => "absent",
            SandboxStatus::Creating => "creating",
            SandboxStatus::Running => "running",
            SandboxStatus::Paused => "paused",
            SandboxStatus::Stopping => "stopping",
            SandboxStatus::Recreating => "recreating",
        }
    }
}

/// One execution environment bound to exactly one project at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub container_id: String,
    pub name: String,
    pub project_id: String,
    pub host_project_dir: PathBuf,
    pub container_project_dir: String,
    /// Host port mapped to the in-sandbox dev-server port.
    pub port: u16,
    pub created_at: DateTime<Utc>,
}

struct ActiveSandbox {
    sandbox: Sandbox,
    sync: Arc<FileSyncEngine>,
}

/// Owns the sandbox for one caller identity. All lifecycle transitions run
/// under a single async mutex, so concurrent callers observing a recreation
/// serialize behind the in-flight one instead of racing to create a second
/// sandbox.
pub struct SandboxOrchestrator {
    user_id: String,
    provider: Arc<dyn Provider>,
    config: Config,
    slot: Mutex<Option<ActiveSandbox>>,
    status: watch::Sender<SandboxStatus>,
}

impl SandboxOrchestrator {
    pub fn new(user_id: impl Into<String>, provider: Arc<dyn Provider>, config: Config) -> Self {
        let (status, _) = watch::channel(SandboxStatus::Absent);
        Self {
            user_id: user_id.into(),
            provider,
            config,
            slot: Mutex::new(None),
            status,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> SandboxStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SandboxStatus> {
        self.status.subscribe()
    }

    pub(crate) fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    fn set_status(&self, status: SandboxStatus) {
        self.status.send_replace(status);
    }

    /// Return a running sandbox bound to `project_id`, creating or
    /// recreating as needed. Idempotent: a matching live sandbox is returned
    /// as-is without touching the provider.
    pub async fn ensure(&self, project_id: &str) -> Result<Sandbox> {
        validate_project_id(project_id)?;

        let mut slot = self.slot.lock().await;

        match slot.as_ref() {
            Some(active) if active.sandbox.project_id == project_id => {
                return Ok(active.sandbox.clone());
            }
            Some(_) => {
                // Bound project changed: replace the sandbox while holding
                // the lifecycle lock, so every concurrent mismatch observer
                // awaits this same stop+create sequence.
                self.set_status(SandboxStatus::Recreating);

                let old = slot.take().expect("checked above");
                info!(
                    user_id = %self.user_id,
                    from = %old.sandbox.project_id,
                    to = %project_id,
                    "bound project changed, recreating sandbox"
                );
                old.sync.stop_watch();
                if let Err(e) = self.stop_and_remove(&old.sandbox).await {
                    self.set_status(SandboxStatus::Absent);
                    return Err(e);
                }
            }
            None => self.set_status(SandboxStatus::Creating),
        }

        match self.create_bound(project_id).await {
            Ok(active) => {
                let sandbox = active.sandbox.clone();
                *slot = Some(active);
                self.set_status(SandboxStatus::Running);
                Ok(sandbox)
            }
            Err(e) => {
                self.set_status(SandboxStatus::Absent);
                Err(e)
            }
        }
    }

    async fn create_bound(&self, project_id: &str) -> Result<ActiveSandbox> {
        let host_dir = self.config.project_dir(project_id);
        tokio::fs::create_dir_all(&host_dir).await?;

        let container_config = self.container_config(project_id, &host_dir, ports::pick_unused_port()?);

        let (container_id, used_config) = match self.provider.create_container(&container_config).await
        {
            Ok(id) => (id, container_config),
            Err(ProviderError::PortInUse(reason)) => {
                // The port was free when picked but taken by the time the
                // runtime bound it. One retry with a fresh pick; a second
                // collision is surfaced as fatal.
                warn!(
                    user_id = %self.user_id,
                    %reason,
                    "sandbox port was taken at creation, retrying with a fresh port"
                );
                let retry_config =
                    self.container_config(project_id, &host_dir, ports::pick_unused_port()?);
                let id = self
                    .provider
                    .create_container(&retry_config)
                    .await
                    .map_err(|e| OrchestratorError::CreateFailed(e.to_string()))?;
                (id, retry_config)
            }
            Err(e) => return Err(e.into()),
        };

        let sandbox = Sandbox {
            container_id,
            name: used_config.name,
            project_id: project_id.to_string(),
            host_project_dir: host_dir.clone(),
            container_project_dir: CONTAINER_PROJECT_ROOT.to_string(),
            port: used_config.ports[0].host_port,
            created_at: Utc::now(),
        };

        let sync = Arc::new(FileSyncEngine::new(host_dir, CONTAINER_PROJECT_ROOT));
        sync.start_watch()?;

        debug!(
            user_id = %self.user_id,
            container_id = %sandbox.container_id,
            port = sandbox.port,
            "sandbox ready"
        );

        Ok(ActiveSandbox { sandbox, sync })
    }

    fn container_config(&self, project_id: &str, host_dir: &Path, port: u16) -> ContainerConfig {
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        ContainerConfig {
            image: self.config.sandbox_image.clone(),
            name: format!("burrow-{}-{}", project_id, &short_id[..8]),
            project_id: project_id.to_string(),
            env_vars: HashMap::new(),
            binds: vec![BindMount {
                host_path: host_dir.to_string_lossy().into_owned(),
                container_path: CONTAINER_PROJECT_ROOT.to_string(),
                readonly: false,
            }],
            ports: vec![PortMapping {
                host_port: port,
                container_port: self.config.preview_port,
            }],
            memory_mb: self.config.sandbox_memory_mb,
            cpu_shares: self.config.sandbox_cpu_shares,
            user: owner_spec(host_dir),
            working_dir: CONTAINER_PROJECT_ROOT.to_string(),
        }
    }

    async fn stop_and_remove(&self, sandbox: &Sandbox) -> Result<()> {
        match self
            .provider
            .stop_container(&sandbox.container_id, STOP_TIMEOUT_SECS)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_idempotent_noop() => {
                debug!(container_id = %sandbox.container_id, "container already stopped");
            }
            Err(e) => return Err(e.into()),
        }

        match self.provider.remove_container(&sandbox.container_id, true).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_idempotent_noop() => {
                debug!(container_id = %sandbox.container_id, "container already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Suspend the sandbox. A missing or already-paused sandbox is a no-op.
    pub async fn pause(&self) -> Result<()> {
        let slot = self.slot.lock().await;
        let Some(active) = slot.as_ref() else {
            return Ok(());
        };

        match self.provider.pause_container(&active.sandbox.container_id).await {
            Ok(()) => {}
            Err(e) if e.is_idempotent_noop() => {}
            Err(ProviderError::Container(msg)) if msg.contains("already paused") => {}
            Err(e) => return Err(e.into()),
        }
        self.set_status(SandboxStatus::Paused);
        Ok(())
    }

    /// Resume the sandbox explicitly.
    pub async fn unpause(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.resume_locked(&mut slot).await?;
        Ok(())
    }

    /// Running sandbox handle for exec/file operations. Transparently
    /// resumes a paused sandbox and starts a stopped one; fails only when no
    /// sandbox is bound at all.
    pub async fn handle(&self) -> Result<Sandbox> {
        let mut slot = self.slot.lock().await;
        self.resume_locked(&mut slot).await
    }

    async fn resume_locked(
        &self,
        slot: &mut tokio::sync::MutexGuard<'_, Option<ActiveSandbox>>,
    ) -> Result<Sandbox> {
        let active = slot.as_ref().ok_or(OrchestratorError::NoSandbox)?;
        let container_id = active.sandbox.container_id.clone();

        let info = self.provider.container_info(&container_id).await?;
        match info.status {
            ContainerStatus::Running => {}
            ContainerStatus::Paused => {
                debug!(%container_id, "resuming paused sandbox");
                match self.provider.unpause_container(&container_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_idempotent_noop() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            ContainerStatus::Stopped | ContainerStatus::Created => {
                debug!(%container_id, "starting idle sandbox");
                match self.provider.start_container(&container_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_idempotent_noop() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            other => {
                return Err(OrchestratorError::Provider(ProviderError::Container(
                    format!("sandbox container in unusable state: {:?}", other),
                )))
            }
        }

        self.set_status(SandboxStatus::Running);
        Ok(slot.as_ref().expect("checked above").sandbox.clone())
    }

    /// Push a file tree into the sandbox storage as one archive transfer.
    pub async fn push(&self, tree: &FileTree) -> Result<()> {
        let (sandbox, sync) = self.running_sync().await?;
        sync.push(self.provider.as_ref(), &sandbox.container_id, tree)
            .await?;
        Ok(())
    }

    async fn running_sync(&self) -> Result<(Sandbox, Arc<FileSyncEngine>)> {
        let mut slot = self.slot.lock().await;
        let sandbox = self.resume_locked(&mut slot).await?;
        let sync = Arc::clone(&slot.as_ref().expect("resume succeeded").sync);
        Ok((sandbox, sync))
    }

    /// Subscribe to external changes in the sandbox storage.
    pub async fn watch(&self) -> Result<broadcast::Receiver<WatchEvent>> {
        let slot = self.slot.lock().await;
        let active = slot.as_ref().ok_or(OrchestratorError::NoSandbox)?;
        Ok(active.sync.subscribe())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let host_path = self.host_path(path).await?;
        Ok(tokio::fs::read(&host_path).await?)
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let host_path = self.host_path(path).await?;
        match tokio::fs::remove_file(&host_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let host_path = self.host_path(path).await?;
        Ok(tokio::fs::create_dir_all(&host_path).await?)
    }

    async fn host_path(&self, relative: &str) -> Result<PathBuf> {
        let slot = self.slot.lock().await;
        let active = slot.as_ref().ok_or(OrchestratorError::NoSandbox)?;
        resolve_relative(&active.sandbox.host_project_dir, relative)
    }

    /// Externally reachable preview address, read from the live port
    /// mapping. The runtime may not have populated the mapping right after
    /// start, so this retries a few times before giving up.
    pub async fn resolve_url(&self) -> Result<String> {
        let sandbox = self.handle().await?;

        for attempt in 0..URL_RESOLVE_ATTEMPTS {
            let info = self.provider.container_info(&sandbox.container_id).await?;
            if let Some(host_port) = info.ports.get(&self.config.preview_port) {
                return Ok(format!("http://localhost:{}", host_port));
            }
            debug!(
                container_id = %sandbox.container_id,
                attempt,
                "port mapping not yet visible"
            );
            tokio::time::sleep(URL_RESOLVE_BACKOFF).await;
        }

        Err(OrchestratorError::PreviewUnavailable)
    }

    /// Stop the watcher, stop and remove the sandbox, clear in-memory state.
    /// Idempotent: tearing down an absent sandbox succeeds.
    pub async fn teardown(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let Some(active) = slot.take() else {
            return Ok(());
        };

        self.set_status(SandboxStatus::Stopping);
        active.sync.stop_watch();
        let result = self.stop_and_remove(&active.sandbox).await;
        self.set_status(SandboxStatus::Absent);

        info!(user_id = %self.user_id, "sandbox torn down");
        result
    }
}

/// Project IDs become directory names and container labels; restrict them
/// to filesystem-safe characters and reject traversal sequences.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        return Err(OrchestratorError::InvalidProjectId(
            "project id cannot be empty".to_string(),
        ));
    }
    if !project_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(OrchestratorError::InvalidProjectId(format!(
            "project id '{}' may only contain alphanumerics, hyphens, and underscores",
            project_id
        )));
    }
    Ok(())
}

/// Join a caller-supplied relative path onto the project root, rejecting
/// absolute paths and parent-directory escapes.
fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(OrchestratorError::InvalidPath(relative.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return Err(OrchestratorError::InvalidPath(relative.to_string())),
        }
    }
    Ok(resolved)
}

/// uid:gid of the storage directory's owner, so the container process
/// writes bind-mounted files the host can still modify.
#[cfg(unix)]
fn owner_spec(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path)
        .ok()
        .map(|m| format!("{}:{}", m.uid(), m.gid()))
}

#[cfg(not(unix))]
fn owner_spec(_path: &Path) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ids_are_validated() {
        assert!(validate_project_id("my-app_2").is_ok());
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("../etc").is_err());
        assert!(validate_project_id("a/b").is_err());
    }

    #[test]
    fn relative_paths_cannot_escape_the_root() {
        let root = Path::new("/data/projects/app");
        assert_eq!(
            resolve_relative(root, "src/index.ts").unwrap(),
            PathBuf::from("/data/projects/app/src/index.ts")
        );
        assert_eq!(
            resolve_relative(root, "./a.txt").unwrap(),
            PathBuf::from("/data/projects/app/a.txt")
        );
        assert!(resolve_relative(root, "../outside").is_err());
        assert!(resolve_relative(root, "/etc/passwd").is_err());
        assert!(resolve_relative(root, "src/../../escape").is_err());
    }
}
