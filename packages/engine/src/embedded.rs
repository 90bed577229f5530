// ABOUTME: Embedded (in-browser) backend: a mirror of client-reported state
// ABOUTME: Holds no server-side process; stop is a no-op

use crate::{Engine, EngineKind, EngineState, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// The in-browser ephemeral runtime runs entirely on the client; the server
/// side only mirrors whatever state the client last reported.
#[derive(Default)]
pub struct EmbeddedEngine {
    reported: RwLock<EngineState>,
}

impl EmbeddedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state the client just reported.
    pub async fn report_state(&self, state: EngineState) {
        *self.reported.write().await = state;
    }
}

#[async_trait]
impl Engine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    async fn state(&self) -> EngineState {
        self.reported.read().await.clone()
    }

    async fn stop_dev_server(&self) -> Result<()> {
        // Nothing runs server-side for the embedded backend
        Ok(())
    }
}
