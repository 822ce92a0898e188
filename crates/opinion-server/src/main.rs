use tracing::info;
use tracing_subscriber::EnvFilter;

use opinion_server::{api, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,opinion_server=debug")),
        )
        .init();

    info!("Starting Second Opinion chat relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.history_limit == 0 {
        info!("Room history is unbounded and lives only as long as this process");
    }

    // -----------------------------------------------------------------------
    // 3. Build the room registry (owned by the app state, dropped on exit)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState::new(config);
    let registry = app_state.registry.clone();

    // -----------------------------------------------------------------------
    // 4. Run the HTTP/WebSocket server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    registry.shutdown().await;

    Ok(())
}
