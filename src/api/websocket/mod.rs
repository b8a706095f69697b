//! WebSocket handlers

pub mod notifications;

pub use notifications::WebSocketTransport;
