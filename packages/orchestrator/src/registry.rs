// ABOUTME: Process-wide mapping from caller identity to its orchestrator
// ABOUTME: Injectable state with get-or-create access and explicit teardown

use crate::config::Config;
use crate::orchestrator::SandboxOrchestrator;
use crate::Result;
use burrow_runtime::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Maps caller identities to their sandbox orchestrators. Constructed once
/// at process start and injected where needed; the registry never owns a
/// sandbox itself, only the orchestrator that does.
pub struct SandboxRegistry {
    provider: Arc<dyn Provider>,
    config: Config,
    orchestrators: RwLock<HashMap<String, Arc<SandboxOrchestrator>>>,
}

impl SandboxRegistry {
    pub fn new(provider: Arc<dyn Provider>, config: Config) -> Self {
        Self {
            provider,
            config,
            orchestrators: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The orchestrator for `user_id`, created on first access.
    pub async fn get_or_create(&self, user_id: &str) -> Arc<SandboxOrchestrator> {
        {
            let orchestrators = self.orchestrators.read().await;
            if let Some(existing) = orchestrators.get(user_id) {
                return Arc::clone(existing);
            }
        }

        let mut orchestrators = self.orchestrators.write().await;
        Arc::clone(orchestrators.entry(user_id.to_string()).or_insert_with(|| {
            info!(%user_id, "creating sandbox orchestrator");
            Arc::new(SandboxOrchestrator::new(
                user_id,
                Arc::clone(&self.provider),
                self.config.clone(),
            ))
        }))
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<SandboxOrchestrator>> {
        self.orchestrators.read().await.get(user_id).cloned()
    }

    /// Tear down the identity's sandbox and forget the orchestrator.
    pub async fn release(&self, user_id: &str) -> Result<()> {
        let removed = self.orchestrators.write().await.remove(user_id);
        if let Some(orchestrator) = removed {
            orchestrator.teardown().await?;
        }
        Ok(())
    }

    /// Tear down every tracked sandbox, keeping going past individual
    /// failures. Called at process shutdown.
    pub async fn teardown_all(&self) {
        let drained: Vec<_> = {
            let mut orchestrators = self.orchestrators.write().await;
            orchestrators.drain().collect()
        };

        for (user_id, orchestrator) in drained {
            if let Err(e) = orchestrator.teardown().await {
                warn!(%user_id, error = %e, "failed to tear down sandbox");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.orchestrators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orchestrators.read().await.is_empty()
    }
}
