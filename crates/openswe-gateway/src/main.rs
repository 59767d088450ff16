//! OpenSWE gateway entry point.
//!
//! Serves the HTTP API until Ctrl-C, then deletes every sandbox it created
//! (committing pending work where enabled).

use openswe_gateway::{http, AppState, GatewayConfig};
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("openswe_gateway=info,openswe_core=info,openswe_exec=info")
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting OpenSWE gateway");

    // Load configuration from environment
    let config = GatewayConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    // Warn-only to support development environments
    config.validate_warn();

    let state = AppState::new(config.clone());
    let cleanup_manager = state.manager_arc();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let http_addr = config.http_addr;

    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };

        if let Err(e) = http::serve(state, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(http_addr = %config.http_addr, "Server ready");

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    let _ = shutdown_tx.send(());
    let _ = http_handle.await;

    // Destroy all managed sandboxes
    if let Err(e) = cleanup_manager.destroy_all().await {
        tracing::error!(error = %e, "Error during sandbox cleanup");
    } else {
        tracing::info!("All sandboxes cleaned up");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
