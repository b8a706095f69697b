//! Notification WebSocket handler
//!
//! Upgrades the request, registers the socket with the hub and streams every
//! fanned-out notification to the client as a text frame.

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::api::server::AppState;
use crate::error::{FlappyoError, Result};
use crate::hub::{Hub, Transport};

/// Outbound half of an upgraded WebSocket
pub struct WebSocketTransport {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WebSocketTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, payload: &str) -> Result<()> {
        self.sink
            .send(Message::Text(payload.to_owned()))
            .await
            .map_err(|e| FlappyoError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.sink.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    }
}

/// WebSocket handler for notification streaming
pub async fn notifications_ws(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_notifications_ws(socket, state.hub))
            .into_response(),
        Err(rejection) => {
            // Upgrade failures never reach the hub.
            warn!("Could not upgrade incoming connection: {}", rejection);
            rejection.into_response()
        }
    }
}

/// Handle one upgraded connection for its whole lifetime
async fn handle_notifications_ws(socket: WebSocket, hub: Hub) {
    let (sender, mut receiver) = socket.split();
    let (connection, delivery) = hub.open_connection(WebSocketTransport::new(sender));
    let id = connection.id();
    let outbox = connection.outbox().clone();

    info!(connection = %id, "Notification WebSocket connected");

    // Watch the inbound half so a client that goes away is noticed before
    // the next write fails.
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!(connection = %id, "Notification WebSocket received close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %id, "Notification WebSocket error: {}", e);
                    break;
                }
            }
        }
        outbox.close();
    });

    if let Err(e) = hub.attach(connection, delivery).await {
        warn!(connection = %id, "Notification WebSocket not served: {}", e);
    }

    receive_task.abort();
    info!(connection = %id, "Notification WebSocket disconnected");
}
