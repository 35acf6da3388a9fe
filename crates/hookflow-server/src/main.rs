use anyhow::{Context, Result};
use hookflow_core::AgentCore;
use hookflow_server::{AgentServer, AppState, ServerConfig};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hookflow_server=debug,hookflow_core=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let config = ServerConfig::load().context("Failed to load configuration")?;
    tracing::info!(
        instance_id = %config.instance_id,
        rpc = %config.rpc_addr(),
        http = %config.http_addr(),
        "Starting hookflow agent"
    );

    let core = AgentCore::new(config.dispatch.clone(), config.history.clone())
        .await
        .context("Failed to initialize agent core")?;
    let state = AppState::new(core.dispatch.clone(), config.instance_id.clone());
    let server = AgentServer::bind(&config, state).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(());
    });

    let result = server.run(shutdown_rx).await;
    core.shutdown().await;
    result
}
