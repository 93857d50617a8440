//! Global configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::assets::AssetLayout;
use crate::engine::framer::MAX_LINE_BYTES;
use crate::{AppError, Result};

/// Smallest accepted `max_line_bytes`; engine `info` lines run to a few hundred bytes.
const MIN_LINE_BYTES: usize = 1024;

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_http_port() -> u16 {
    3000
}

fn default_max_sessions() -> u32 {
    8
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_teardown_timeout_seconds() -> u64 {
    5
}

fn default_engine_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_executable() -> String {
    "pikafish-sse41-popcnt".into()
}

fn default_eval_file() -> String {
    "pikafish.nnue".into()
}

/// Engine asset location, the `[engine]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// How `root` is anchored: source tree or installed bundle.
    #[serde(default)]
    pub layout: AssetLayout,
    /// Directory holding the engine and its evaluation file.
    #[serde(default = "default_engine_root")]
    pub root: PathBuf,
    /// Engine executable file name under `root`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Evaluation network file name under `root`.
    #[serde(default = "default_eval_file")]
    pub eval_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: AssetLayout::default(),
            root: default_engine_root(),
            executable: default_executable(),
            eval_file: default_eval_file(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the WebSocket listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Listener port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Maximum concurrent sessions (one engine process each).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Longest engine output line accepted before a session fails.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Seconds teardown waits for an engine to exit after termination.
    #[serde(default = "default_teardown_timeout_seconds")]
    pub teardown_timeout_seconds: u64,
    /// Engine asset location.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            max_sessions: default_max_sessions(),
            max_line_bytes: default_max_line_bytes(),
            teardown_timeout_seconds: default_teardown_timeout_seconds(),
            engine: EngineConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address the listener binds to.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    /// Teardown wait as a [`Duration`].
    #[must_use]
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_seconds)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(AppError::Config(
                "max_sessions must be greater than zero".into(),
            ));
        }

        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(AppError::Config(format!(
                "max_line_bytes must be at least {MIN_LINE_BYTES}"
            )));
        }

        if self.engine.executable.trim().is_empty() {
            return Err(AppError::Config(
                "engine.executable must not be empty".into(),
            ));
        }

        if self.engine.eval_file.trim().is_empty() {
            return Err(AppError::Config("engine.eval_file must not be empty".into()));
        }

        Ok(())
    }
}
