// ABOUTME: Docker provider implementation for local container-based sandboxes
// ABOUTME: Uses bollard to manage container lifecycle, exec, and archive upload

use super::{
    ContainerConfig, ContainerInfo, ContainerStatus, ExecResult, ExecStream, OutputChunk, Provider,
    ProviderError, Result, StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
    /// Timeout for image pull operations
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Create a new Docker provider with the default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    /// Create a new Docker provider with a custom pull timeout
    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self::with_client_and_timeout(client, Duration::from_secs(600))
    }

    pub fn with_client_and_timeout(client: Docker, pull_timeout: Duration) -> Self {
        Self {
            client,
            label_prefix: "burrow".to_string(),
            pull_timeout,
        }
    }

    /// Convert our config to bollard config
    fn to_bollard_config(&self, config: &ContainerConfig) -> Config<String> {
        let mut labels = HashMap::new();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(
            format!("{}.project", self.label_prefix),
            config.project_id.clone(),
        );

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in &config.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.host_port.to_string()),
            }];
            port_bindings.insert(container_port, Some(binding));
        }

        let binds: Vec<String> = config
            .binds
            .iter()
            .map(|b| {
                format!(
                    "{}:{}:{}",
                    b.host_path,
                    b.container_path,
                    if b.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        // Sandboxes never run privileged and carry no capabilities; the
        // workload is untrusted generated code.
        let host_config = bollard::models::HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            memory: Some((config.memory_mb * 1024 * 1024) as i64),
            cpu_shares: Some(config.cpu_shares),
            cap_drop: Some(vec!["ALL".to_string()]),
            privileged: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            // Keep PID 1 alive so the sandbox accepts exec sessions for as
            // long as it is bound to the project.
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "tail -f /dev/null".to_string(),
            ]),
            env: Some(env),
            user: config.user.clone(),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Convert bollard container status to our status
    fn convert_status(state: &str) -> ContainerStatus {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" | "restarting" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }

    /// Map a bollard error onto the provider taxonomy. Port collisions and
    /// idempotent no-ops get their own variants so callers can retry or
    /// swallow them.
    fn classify(err: bollard::errors::Error) -> ProviderError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => ProviderError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                message,
            } => ProviderError::AlreadyInState(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } if message.contains("port is already allocated")
                || message.contains("address already in use") =>
            {
                debug!(status_code, "container start hit a bound port");
                ProviderError::PortInUse(message)
            }
            other => ProviderError::Container(other.to_string()),
        }
    }

    fn exec_options(
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> CreateExecOptions<String> {
        let env: Option<Vec<String>> = env_vars.map(|vars| {
            vars.into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect()
        });

        CreateExecOptions {
            cmd: Some(command),
            env,
            working_dir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        if !self.image_exists(&config.image).await? {
            info!("Pulling image: {}", config.image);
            self.pull_image(&config.image).await?;
        }

        let bollard_config = self.to_bollard_config(config);
        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), bollard_config)
            .await
            .map_err(Self::classify)?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self.start_container(&container.id).await {
            // The created-but-unstartable container would otherwise hold the
            // name and the port binding; remove it before reporting.
            let _ = self.remove_container(&container.id, true).await;
            return Err(e);
        }

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(Self::classify)
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        self.client
            .stop_container(container_id, Some(options))
            .await
            .map_err(Self::classify)
    }

    async fn pause_container(&self, container_id: &str) -> Result<()> {
        info!("Pausing container: {}", container_id);

        self.client
            .pause_container(container_id)
            .await
            .map_err(Self::classify)
    }

    async fn unpause_container(&self, container_id: &str) -> Result<()> {
        info!("Unpausing container: {}", container_id);

        self.client
            .unpause_container(container_id)
            .await
            .map_err(Self::classify)
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            v: true, // Remove volumes
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(Self::classify)
    }

    async fn container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(Self::classify)?;

        let state = inspect.state.as_ref().ok_or_else(|| {
            ProviderError::Container("Container has no state information".to_string())
        })?;

        let status = Self::convert_status(
            state
                .status
                .as_ref()
                .map(|s| s.as_ref())
                .unwrap_or("unknown"),
        );

        let mut ports = HashMap::new();
        if let Some(network_settings) = &inspect.network_settings {
            if let Some(port_map) = &network_settings.ports {
                for (container_port_str, bindings) in port_map {
                    let Some(bindings) = bindings else { continue };
                    let Some(binding) = bindings.first() else {
                        continue;
                    };
                    let Some(host_port_str) = &binding.host_port else {
                        continue;
                    };
                    // Container port format: "3000/tcp"
                    if let Some(port_num) = container_port_str.split('/').next() {
                        if let (Ok(container_port), Ok(host_port)) =
                            (port_num.parse::<u16>(), host_port_str.parse::<u16>())
                        {
                            ports.insert(container_port, host_port);
                        }
                    }
                }
            }
        }

        let created_at = inspect
            .created
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        let started_at = state
            .started_at
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: inspect
                .name
                .unwrap_or_else(|| container_id.to_string())
                .trim_start_matches('/')
                .to_string(),
            status,
            ports,
            created_at,
            started_at,
        })
    }

    async fn list_managed(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}.managed=true", self.label_prefix)],
        );

        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(Self::classify)?;

        let mut infos = Vec::new();
        for container in containers {
            if let Some(id) = container.id {
                match self.container_info(&id).await {
                    Ok(info) => infos.push(info),
                    Err(e) => {
                        warn!("Failed to inspect container {}: {}", id, e);
                    }
                }
            }
        }

        Ok(infos)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult> {
        debug!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec = self
            .client
            .create_exec(
                container_id,
                Self::exec_options(command, working_dir, env_vars),
            )
            .await
            .map_err(Self::classify)?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(Self::classify)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::Container(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(Self::classify)?;

        Ok(ExecResult {
            exit_code: exec_inspect.exit_code.unwrap_or(0),
            stdout,
            stderr,
        })
    }

    async fn exec_streamed(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecStream> {
        debug!(
            "Executing streamed command in container {}: {:?}",
            container_id, command
        );

        let exec = self
            .client
            .create_exec(
                container_id,
                Self::exec_options(command, working_dir, env_vars),
            )
            .await
            .map_err(Self::classify)?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(Self::classify)?;

        let StartExecResults::Attached { output, .. } = start_result else {
            return Err(ProviderError::Container(
                "Exec was detached unexpectedly".to_string(),
            ));
        };

        let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();

        let client = self.client.clone();
        let exec_id = exec.id.clone();
        tokio::spawn(async move {
            let mut output = Box::pin(output);
            while let Some(msg) = output.next().await {
                let chunk = match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        OutputChunk {
                            timestamp: chrono::Utc::now(),
                            stream: StreamType::Stdout,
                            data: message.to_vec(),
                        }
                    }
                    Ok(LogOutput::StdErr { message }) => OutputChunk {
                        timestamp: chrono::Utc::now(),
                        stream: StreamType::Stderr,
                        data: message.to_vec(),
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Error streaming exec output: {}", e);
                        break;
                    }
                };

                if chunk_tx.send(chunk).is_err() {
                    break; // Receiver dropped; the exec keeps running
                }
            }

            let exit_code = match client.inspect_exec(&exec_id).await {
                Ok(inspect) => inspect.exit_code.unwrap_or(0),
                Err(e) => {
                    warn!("Failed to inspect exec {}: {}", exec_id, e);
                    0
                }
            };
            let _ = exit_tx.send(exit_code);
        });

        Ok(ExecStream {
            chunks: chunk_rx,
            exit_code: exit_rx,
        })
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        tar_data: Vec<u8>,
    ) -> Result<()> {
        debug!(
            "Uploading {} byte archive to container {}:{}",
            tar_data.len(),
            container_id,
            dest_path
        );

        let options = UploadToContainerOptions {
            path: dest_path.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), tar_data.into())
            .await
            .map_err(Self::classify)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = Box::pin(stream);
            while let Some(progress) = stream.next().await {
                match progress {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(ProviderError::Image(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::Image(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Image(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::Image(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{BindMount, PortMapping};

    fn sample_config() -> ContainerConfig {
        ContainerConfig {
            image: "node:20-slim".to_string(),
            name: "burrow-demo".to_string(),
            project_id: "demo".to_string(),
            env_vars: HashMap::from([("NODE_ENV".to_string(), "development".to_string())]),
            binds: vec![BindMount {
                host_path: "/tmp/burrow/projects/demo".to_string(),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
            ports: vec![PortMapping {
                host_port: 34567,
                container_port: 3000,
            }],
            memory_mb: 2048,
            cpu_shares: 1024,
            user: Some("1000:1000".to_string()),
            working_dir: "/workspace".to_string(),
        }
    }

    #[test]
    fn config_conversion_sets_labels_and_hardening() {
        let client = Docker::connect_with_defaults();
        let provider = match client {
            Ok(c) => DockerProvider::with_client(c),
            Err(_) => return, // No Docker socket in this environment
        };

        let config = provider.to_bollard_config(&sample_config());

        assert_eq!(config.image, Some("node:20-slim".to_string()));
        assert_eq!(config.user, Some("1000:1000".to_string()));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get("burrow.managed"), Some(&"true".to_string()));
        assert_eq!(labels.get("burrow.project"), Some(&"demo".to_string()));

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.privileged, Some(false));
        assert_eq!(host_config.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host_config.binds,
            Some(vec![
                "/tmp/burrow/projects/demo:/workspace:rw".to_string()
            ])
        );
        assert!(host_config.port_bindings.unwrap().contains_key("3000/tcp"));
    }

    #[test]
    fn status_conversion_covers_docker_states() {
        assert_eq!(
            DockerProvider::convert_status("running"),
            ContainerStatus::Running
        );
        assert_eq!(
            DockerProvider::convert_status("paused"),
            ContainerStatus::Paused
        );
        assert_eq!(
            DockerProvider::convert_status("exited"),
            ContainerStatus::Stopped
        );
        assert!(matches!(
            DockerProvider::convert_status("weird"),
            ContainerStatus::Unknown(_)
        ));
    }

    #[test]
    fn classify_maps_idempotent_noops() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(DockerProvider::classify(not_found).is_idempotent_noop());

        let already_stopped = bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            message: "container already stopped".to_string(),
        };
        assert!(DockerProvider::classify(already_stopped).is_idempotent_noop());

        let port_taken = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "Bind for 0.0.0.0:34567 failed: port is already allocated".to_string(),
        };
        assert!(matches!(
            DockerProvider::classify(port_taken),
            ProviderError::PortInUse(_)
        ));
    }
}
