// ABOUTME: Runs commands inside a sandbox with a hard local timeout
// ABOUTME: One-shot buffered execution plus incremental streaming to a caller sink

use crate::orchestrator::SandboxOrchestrator;
use crate::Result;
use burrow_runtime::{ExecStream, OutputChunk, StreamType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Exit code reported when the local execution ceiling is exceeded, mirroring
/// the shell convention for timed-out commands.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Outcome of one command invocation inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes agent-issued shell commands inside the caller's sandbox.
pub struct CommandExecutor {
    orchestrator: Arc<SandboxOrchestrator>,
}

impl CommandExecutor {
    pub fn new(orchestrator: Arc<SandboxOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run a command and wait for completion. A command exceeding the
    /// configured ceiling resolves with [`TIMEOUT_EXIT_CODE`] and a marker
    /// suffix; the timeout is reported, never raised.
    pub async fn exec(
        &self,
        command: &str,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecOutcome> {
        let sandbox = self.orchestrator.handle().await?;
        let provider = self.orchestrator.provider();
        let timeout = self.orchestrator.config().exec_timeout;

        let working_dir = working_dir.or_else(|| Some(sandbox.container_project_dir.clone()));

        debug!(container_id = %sandbox.container_id, %command, "executing command");

        let exec = provider.exec(
            &sandbox.container_id,
            shell_command(command),
            working_dir,
            env_vars,
        );

        match tokio::time::timeout(timeout, exec).await {
            Ok(result) => {
                let result = result?;
                Ok(ExecOutcome {
                    stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
                    exit_code: result.exit_code,
                    timed_out: false,
                })
            }
            Err(_) => {
                warn!(
                    container_id = %sandbox.container_id,
                    %command,
                    timeout_secs = timeout.as_secs(),
                    "command exceeded execution ceiling"
                );
                Ok(ExecOutcome {
                    stdout: String::new(),
                    stderr: format!("[command timed out after {}s]", timeout.as_secs()),
                    exit_code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                })
            }
        }
    }

    /// Run a command, yielding output chunks as they arrive. There is no
    /// hard timeout: streaming commands end when the process exits or the
    /// consumer goes away.
    pub async fn exec_stream(
        &self,
        command: &str,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecStream> {
        let sandbox = self.orchestrator.handle().await?;
        let provider = self.orchestrator.provider();

        let working_dir = working_dir.or_else(|| Some(sandbox.container_project_dir.clone()));

        debug!(container_id = %sandbox.container_id, %command, "executing streamed command");

        Ok(provider
            .exec_streamed(
                &sandbox.container_id,
                shell_command(command),
                working_dir,
                env_vars,
            )
            .await?)
    }

    /// Convenience wrapper: forward every chunk to `on_data` and resolve
    /// with the final exit code once the stream ends.
    pub async fn exec_stream_with<F>(
        &self,
        command: &str,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
        mut on_data: F,
    ) -> Result<i64>
    where
        F: FnMut(OutputChunk) + Send,
    {
        let mut stream = self.exec_stream(command, working_dir, env_vars).await?;

        while let Some(chunk) = stream.chunks.recv().await {
            on_data(chunk);
        }

        Ok(stream.exit_code.await.unwrap_or(0))
    }
}

/// Free-form agent commands run through a login shell, matching how a
/// developer would type them.
fn shell_command(command: &str) -> Vec<String> {
    vec!["sh".to_string(), "-lc".to_string(), command.to_string()]
}

/// Split a combined chunk stream back into stdout and stderr strings.
pub fn partition_chunks(chunks: &[OutputChunk]) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for chunk in chunks {
        match chunk.stream {
            StreamType::Stdout => stdout.extend_from_slice(&chunk.data),
            StreamType::Stderr => stderr.extend_from_slice(&chunk.data),
        }
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn combined_output_joins_streams() {
        let outcome = ExecOutcome {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: 0,
            timed_out: false,
        };
        assert_eq!(outcome.combined(), "out\nerr");

        let quiet = ExecOutcome {
            stdout: String::new(),
            stderr: "err only".to_string(),
            exit_code: 1,
            timed_out: false,
        };
        assert_eq!(quiet.combined(), "err only");
    }

    #[test]
    fn shell_command_wraps_free_form_input() {
        assert_eq!(
            shell_command("npm install && npm run build"),
            vec!["sh", "-lc", "npm install && npm run build"]
        );
    }

    #[test]
    fn partition_chunks_reassembles_streams() {
        let chunks = vec![
            OutputChunk {
                timestamp: Utc::now(),
                stream: StreamType::Stdout,
                data: b"hello ".to_vec(),
            },
            OutputChunk {
                timestamp: Utc::now(),
                stream: StreamType::Stderr,
                data: b"oops".to_vec(),
            },
            OutputChunk {
                timestamp: Utc::now(),
                stream: StreamType::Stdout,
                data: b"world".to_vec(),
            },
        ];

        let (stdout, stderr) = partition_chunks(&chunks);
        assert_eq!(stdout, "hello world");
        assert_eq!(stderr, "oops");
    }
}
