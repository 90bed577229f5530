// ABOUTME: Host port allocation for sandbox preview mappings
// ABOUTME: Asks the OS for an ephemeral port by binding and releasing it

use crate::{OrchestratorError, Result};
use std::net::TcpListener;

/// Pick a currently-unused host port. The port is released before this
/// returns, so a caller racing another process can still lose it; creation
/// paths handle that by retrying with a fresh pick.
pub fn pick_unused_port() -> Result<u16> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).map_err(|_| OrchestratorError::NoFreePort)?;
    let port = listener
        .local_addr()
        .map_err(|_| OrchestratorError::NoFreePort)?
        .port();
    Ok(port)
}
