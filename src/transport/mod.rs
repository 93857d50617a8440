//! Client-facing transports.
//!
//! - `ws`: axum WebSocket listener; one [`SessionBridge`](crate::bridge::session::SessionBridge)
//!   per accepted connection.

pub mod ws;
