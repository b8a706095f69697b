//! Trigger endpoint
//!
//! Every hit sends one "yo" to all connected clients.

use axum::extract::{Query, State};
use serde::Deserialize;
use tracing::info;

use crate::api::server::AppState;
use crate::error::Result;
use crate::models::NotificationEvent;

/// Fixed acknowledgment body, returned whatever the fan-out outcome
pub const ACK: &str = "Flap!";

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    /// Origin of the yo; empty when not given
    #[serde(default)]
    pub username: String,
}

/// Queue a notification from `username` and acknowledge immediately
pub async fn flappyo(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
) -> Result<&'static str> {
    state
        .hub
        .notify(NotificationEvent::new(query.username))
        .await?;

    info!("Flap!");
    Ok(ACK)
}
