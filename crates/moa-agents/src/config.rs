//! Configuration loading for the binary.
//!
//! The config file is optional: without one every knob takes its default,
//! and `MOA_*` environment variables still apply on top.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coordination::CoordinationConfig;
use tracing::info;

/// Environment variable naming the config file when `--config` is absent
pub const ENV_CONFIG_PATH: &str = "MOA_CONFIG";

/// Config file path: explicit argument first, then `MOA_CONFIG`
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
}

/// Load, override from the environment, and validate
pub fn load(explicit: Option<&Path>) -> Result<CoordinationConfig> {
    let raw = match resolve_path(explicit) {
        Some(path) => {
            info!(path = %path.display(), "Loading config file");
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?
        }
        None => String::new(),
    };

    CoordinationConfig::load(&raw).context("Invalid coordination config")
}
