//! HTTP server using Axum
//!
//! Serves the notification WebSocket, the trigger endpoint and static assets.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{FlappyoError, Result};
use crate::hub::Hub;

use super::routes;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub started_at: Instant,
}

/// HTTP server
pub struct ApiServer {
    addr: SocketAddr,
    static_dir: PathBuf,
    state: AppState,
}

impl ApiServer {
    /// Create a new HTTP server
    pub fn new(config: &Config, hub: Hub) -> Result<Self> {
        Ok(Self {
            addr: config.listen_addr()?,
            static_dir: config.server.static_dir.clone(),
            state: AppState {
                hub,
                started_at: Instant::now(),
            },
        })
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone(), &self.static_dir)
            .layer(TraceLayer::new_for_http())
    }

    /// Address from the configuration
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve on an already bound listener until shutdown
    #[instrument(skip(self, listener, shutdown))]
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let router = self.build_router();

        info!("Server is now listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| FlappyoError::Internal(e.to_string()))?;

        info!("Server shut down");
        Ok(())
    }
}
