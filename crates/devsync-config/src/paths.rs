//! Filesystem locations.
//!
//! # Environment Variables
//!
//! - `DEVSYNC_CONFIG_DIR` - Override the configuration directory

use std::path::{Path, PathBuf};

/// Application directory name under the platform config dir.
pub const APP_NAME: &str = "devsync";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "DEVSYNC_CONFIG_DIR";

/// Get the XDG config directory for devsync.
///
/// Checks `DEVSYNC_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Directory for rotated log files.
pub fn log_dir() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join("logs"))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/"))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
