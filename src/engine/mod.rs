//! Engine subprocess handling.
//!
//! - `assets`: locating the executable and evaluation file.
//! - `framer`: incremental newline framing of engine output.
//! - `process`: launching, writing to, and terminating one engine.
//! - `reader` / `writer`: per-pipe tasks feeding and draining the process.
//! - `translator`: client JSON ↔ UCI command lines.

pub mod assets;
pub mod framer;
pub mod process;
pub mod reader;
pub mod translator;
pub mod writer;
