//! Connection-scoped bridging between a client and an engine process.

pub mod session;
