//! Configuration directory helpers for the Gmail channel
//!
//! Resolves the shared config directory (~/.config/gmail-channel/ by default,
//! overridable through `GMAIL_CHANNEL_CONFIG_DIR`) and loads or saves JSON
//! files inside it.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable that replaces the default config directory
pub const CONFIG_DIR_ENV: &str = "GMAIL_CHANNEL_CONFIG_DIR";

/// Initialize the config directory.
///
/// Creates the directory if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the config directory
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|p| p.join("gmail-channel"))
}

/// Get the path to a config file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Get the directory used for runtime state (sessions, attachments)
pub fn state_dir() -> Option<PathBuf> {
    config_dir().map(|p| p.join("state"))
}

/// Load and parse a JSON config file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as JSON to a config file in the config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as pretty-printed JSON to an arbitrary path
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}
