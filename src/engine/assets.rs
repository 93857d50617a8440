//! Engine asset resolution.
//!
//! The bridge never decides where the engine lives. It is handed an
//! [`AssetResolver`] at startup which yields the executable, the evaluation
//! file passed through `setoption`, and the working directory for the
//! process. [`LayoutResolver`] covers the installed and source-tree layouts;
//! [`FixedAssets`] takes explicit paths.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::{AppError, Result};

/// Resolved paths needed to launch one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAssets {
    /// Absolute path to the engine executable.
    pub executable: PathBuf,
    /// Absolute path to the evaluation network file.
    pub eval_file: PathBuf,
    /// Directory the engine runs in (the executable's parent).
    pub working_dir: PathBuf,
}

impl EngineAssets {
    /// Build assets for `executable`, running in its containing directory.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, eval_file: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let working_dir = executable
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            executable,
            eval_file: eval_file.into(),
            working_dir,
        }
    }

    /// Check that both files exist before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] naming which asset is missing.
    pub fn verify(&self) -> Result<()> {
        let engine = self.executable.is_file();
        let eval_file = self.eval_file.is_file();
        if engine && eval_file {
            return Ok(());
        }
        Err(AppError::Launch(format!(
            "asset not found: engine={engine} ({}), eval_file={eval_file} ({})",
            self.executable.display(),
            self.eval_file.display()
        )))
    }
}

/// Strategy that locates the engine for a new session.
pub trait AssetResolver: Send + Sync {
    /// Resolve the engine assets.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] when the paths cannot be determined.
    fn resolve(&self) -> Result<EngineAssets>;
}

/// Explicit, pre-resolved paths.
#[derive(Debug, Clone)]
pub struct FixedAssets(pub EngineAssets);

impl AssetResolver for FixedAssets {
    fn resolve(&self) -> Result<EngineAssets> {
        Ok(self.0.clone())
    }
}

/// Where engine files live relative to the running bridge.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetLayout {
    /// Source checkout: `root` is relative to the current directory.
    #[default]
    Development,
    /// Installed bundle: `root` is relative to the bridge binary's directory.
    Packaged,
}

/// Resolves engine files under a root chosen by [`AssetLayout`].
#[derive(Debug, Clone)]
pub struct LayoutResolver {
    layout: AssetLayout,
    root: PathBuf,
    executable: String,
    eval_file: String,
}

impl LayoutResolver {
    /// Build a resolver from the `[engine]` config table.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            layout: config.layout,
            root: config.root.clone(),
            executable: config.executable.clone(),
            eval_file: config.eval_file.clone(),
        }
    }

    /// Directory both assets are resolved against.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] if the current directory or binary
    /// location cannot be read.
    pub fn base_dir(&self) -> Result<PathBuf> {
        if self.root.is_absolute() {
            return Ok(self.root.clone());
        }
        let anchor = match self.layout {
            AssetLayout::Development => std::env::current_dir().map_err(|err| {
                AppError::Launch(format!("cannot read current directory: {err}"))
            })?,
            AssetLayout::Packaged => std::env::current_exe()
                .map_err(|err| AppError::Launch(format!("cannot locate bridge binary: {err}")))?
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| AppError::Launch("bridge binary has no parent directory".into()))?,
        };
        Ok(anchor.join(&self.root))
    }
}

impl AssetResolver for LayoutResolver {
    fn resolve(&self) -> Result<EngineAssets> {
        let base = self.base_dir()?;
        Ok(EngineAssets::new(
            base.join(&self.executable),
            base.join(&self.eval_file),
        ))
    }
}
