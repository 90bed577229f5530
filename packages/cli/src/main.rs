// ABOUTME: Entry point for the burrow sandbox orchestration server
// ABOUTME: Serves the HTTP API and cleans up managed containers on shutdown

use anyhow::Context;
use burrow_api::AppState;
use burrow_orchestrator::{Config, SandboxRegistry};
use burrow_runtime::{DockerProvider, Provider};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "burrow",
    about = "Sandbox orchestration for AI-generated app previews",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sandbox API server (default)
    Serve {
        /// Port to listen on (overrides BURROW_API_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stop and remove every burrow-managed container, then exit
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Sweep => sweep().await,
    }
}

async fn serve(mut config: Config, port_override: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port_override {
        config.api_port = port;
    }

    let provider = Arc::new(
        DockerProvider::new().context("failed to connect to the container runtime")?,
    );
    if !provider.is_available().await? {
        anyhow::bail!("container runtime is not responding");
    }

    tokio::fs::create_dir_all(config.data_dir.join("projects"))
        .await
        .context("failed to create data directory")?;

    let registry = Arc::new(SandboxRegistry::new(
        provider as Arc<dyn Provider>,
        config.clone(),
    ));
    let state = Arc::new(AppState::new(Arc::clone(&registry)));
    let app = burrow_api::router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.api_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.api_port))?;

    info!("burrow api listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(registry))
        .await?;

    Ok(())
}

async fn shutdown(registry: Arc<SandboxRegistry>) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
        return;
    }
    info!("shutting down, tearing down sandboxes");
    registry.teardown_all().await;
}

/// Remove containers left behind by earlier runs: anything carrying the
/// burrow management label, tracked in memory or not.
async fn sweep() -> anyhow::Result<()> {
    let provider =
        DockerProvider::new().context("failed to connect to the container runtime")?;

    let containers = provider.list_managed(true).await?;
    if containers.is_empty() {
        info!("no managed containers found");
        return Ok(());
    }

    for container in containers {
        info!(id = %container.id, name = %container.name, "removing managed container");
        if let Err(e) = provider.stop_container(&container.id, 5).await {
            if !e.is_idempotent_noop() {
                warn!(id = %container.id, error = %e, "failed to stop container");
            }
        }
        if let Err(e) = provider.remove_container(&container.id, true).await {
            if !e.is_idempotent_noop() {
                warn!(id = %container.id, error = %e, "failed to remove container");
            }
        }
    }

    Ok(())
}
