//! Flappyo Server - Entry Point
//!
//! Starts the hub and the HTTP server with graceful shutdown support.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flappyo::api::ApiServer;
use flappyo::config::{Config, LogConfig};
use flappyo::Hub;

#[tokio::main]
async fn main() -> flappyo::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log);

    info!("Starting Flappyo");

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start the hub
    let (hub, hub_runner) = Hub::new(config.hub.clone());
    let hub_shutdown = shutdown_tx.subscribe();
    let hub_task = tokio::spawn(async move {
        hub_runner.run(hub_shutdown).await;
    });

    // Bind before announcing readiness; failure here is fatal.
    let api_server = ApiServer::new(&config, hub)?;
    let listener = tokio::net::TcpListener::bind(api_server.addr()).await?;

    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.serve(listener, api_shutdown).await {
            error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    // Wait for all tasks to complete
    let _ = tokio::join!(api_task, hub_task);

    info!("Flappyo stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("flappyo={level},tower_http={level}", level = log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
