//! Flappyo - real-time "yo" broadcaster
//!
//! Clients hold a WebSocket open; every hit on the trigger endpoint sends a
//! short notification to all of them.
//!
//! ## Features
//!
//! - Single control loop owning the live-connection set (no locks)
//! - Independent per-connection delivery with bounded outboxes
//! - One fan-out task per notification, ordered per connection
//! - Slow consumers are evicted after a bounded wait
//! - Static client served from a configurable directory

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;

pub use config::Config;
pub use error::{FlappyoError, Result};
pub use hub::{Hub, HubConfig, HubRunner};
