//! Domain model module declarations.

pub mod bridge;
pub mod client;
pub mod engine;
