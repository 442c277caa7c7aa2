//! Configuration file loading and atomic persistence.
//!
//! The config is TOML on disk, re-read on demand rather than memoized: role
//! swaps write the new assignment here so it survives restart, and `reload()`
//! on the facade simply calls back into [`load_config`].

use skybridge_types::{AppConfig, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "skybridge.toml";
pub const CONFIG_ENV: &str = "SKYBRIDGE_CONFIG";

/// Platform config dir + `skybridge/skybridge.toml`, creating the directory
/// if needed.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let dir = base.join("skybridge");
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| ConfigError::Write {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(dir.join(CONFIG_FILE))
}

/// Resolution order: explicit flag, `SKYBRIDGE_CONFIG` env var, platform
/// default.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    default_config_path()
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile {
            path: path.display().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    debug!(path = %path.display(), primary = %config.cluster.primary, "config loaded");
    Ok(config)
}

/// Write through a temp file then rename, so a crash mid-save never leaves a
/// truncated config behind.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let temp_path = path.with_extension("toml.tmp");
    fs::write(&temp_path, content).map_err(|e| ConfigError::Write {
        path: temp_path.display().to_string(),
        message: e.to_string(),
    })?;
    fs::rename(&temp_path, path).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load, mutate, save in one step, for callers that edit the file without
/// holding the in-memory state.
pub fn update_config<F>(path: &Path, updater: F) -> Result<AppConfig, ConfigError>
where
    F: FnOnce(&mut AppConfig),
{
    let mut config = load_config(path)?;
    updater(&mut config);
    save_config(path, &config)?;
    Ok(config)
}
