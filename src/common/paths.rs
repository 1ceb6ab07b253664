//! Configuration and log locations

use std::path::PathBuf;

/// Application name used for platform directories
const APP_NAME: &str = "crucible";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/crucible/`
/// - macOS: `~/Library/Application Support/crucible/`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the default log file
pub fn default_log_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("logs").join("collector.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }
}
