// ABOUTME: Chooses the active sandbox backend behind one uniform interface
// ABOUTME: Switching stops the previous backend's dev process but keeps it resumable

use crate::{Engine, EngineKind, EngineState, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Facade over the available backends. Every observable is re-read from
/// whichever backend is currently active, so a mode switch immediately
/// changes what downstream observers see.
pub struct EngineSelector {
    active: RwLock<EngineKind>,
    engines: HashMap<EngineKind, Arc<dyn Engine>>,
}

impl EngineSelector {
    pub fn new(engines: Vec<Arc<dyn Engine>>, initial: EngineKind) -> Self {
        let engines: HashMap<EngineKind, Arc<dyn Engine>> =
            engines.into_iter().map(|e| (e.kind(), e)).collect();
        debug_assert!(engines.contains_key(&initial));

        Self {
            active: RwLock::new(initial),
            engines,
        }
    }

    pub async fn active_kind(&self) -> EngineKind {
        *self.active.read().await
    }

    pub fn engine(&self, kind: EngineKind) -> Option<Arc<dyn Engine>> {
        self.engines.get(&kind).cloned()
    }

    pub async fn active_engine(&self) -> Arc<dyn Engine> {
        let kind = *self.active.read().await;
        Arc::clone(&self.engines[&kind])
    }

    /// Observable state of the active backend, recomputed on every call.
    pub async fn state(&self) -> EngineState {
        self.active_engine().await.state().await
    }

    /// Switch the active backend. The previous backend's long-running dev
    /// process is stopped first; the backend itself is left resumable.
    pub async fn select(&self, kind: EngineKind) -> Result<()> {
        let mut active = self.active.write().await;
        if *active == kind {
            return Ok(());
        }

        let previous = Arc::clone(&self.engines[&*active]);
        previous.stop_dev_server().await?;

        info!(from = previous.kind().as_str(), to = kind.as_str(), "switching sandbox engine");
        *active = kind;
        Ok(())
    }
}
