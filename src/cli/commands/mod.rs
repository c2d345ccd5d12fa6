//! CLI command implementations.

pub mod objects;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::models::QcConfig;
use crate::infrastructure::config::ConfigLoader;

/// The configuration path given to the command, else the global one.
pub fn config_path(explicit: Option<PathBuf>, global: Option<&Path>) -> Result<PathBuf> {
    explicit
        .or_else(|| global.map(Path::to_path_buf))
        .context("No configuration given. Pass a path, use --config, or set QC_CONFIG")
}

pub fn load_config(path: &Path) -> Result<QcConfig> {
    ConfigLoader::load_from_file(path).with_context(|| format!("Invalid configuration {}", path.display()))
}
