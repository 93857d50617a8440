#![forbid(unsafe_code)]

//! Bridge between browser clients on a WebSocket and a local UCI engine.
//!
//! Each client connection owns one engine subprocess. Client `getmove`
//! requests become `position`/`go` commands on the engine's stdin, and the
//! engine's `bestmove` replies come back as `engineMove` events.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
