//! HTTP surface
//!
//! Provides the notification WebSocket, the trigger endpoint and static
//! asset serving around the hub.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
