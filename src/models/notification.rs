//! Notification event and its wire payload

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Serialized notification, shared by every outbox it is fanned out to
pub type Payload = Arc<str>;

/// One trigger occurrence ("yo")
///
/// On the wire this is a JSON object with a single string field `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Who or what triggered the event
    #[serde(rename = "from")]
    pub origin: String,
}

impl NotificationEvent {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    /// Encode into the text frame payload sent to clients
    pub fn encode(&self) -> Result<Payload> {
        let json = serde_json::to_string(self)?;
        Ok(Payload::from(json))
    }

    /// Decode a text frame payload
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
