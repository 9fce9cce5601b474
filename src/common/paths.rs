//! Configuration and data paths
//!
//! Uses the directories crate for platform-appropriate locations.

use std::io;
use std::path::PathBuf;

/// Project name used for config/data directories
const PROJECT_NAME: &str = "scenario-cli";

/// Get the configuration directory path
///
/// Platform-specific:
/// - Linux: `~/.config/scenario-cli/`
/// - macOS: `~/Library/Application Support/scenario-cli/`
/// - Windows: `%APPDATA%\scenario-cli\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", PROJECT_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Ensure the configuration directory exists
pub fn ensure_config_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = config_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}
