//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ipc::codec::{DEFAULT_MAX_FRAME, MAX_FRAME_LIMIT};
use crate::ipc::transport::{RedirectSet, StdStream};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Worker process settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Standard stream capture settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Console report settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Worker process settings
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Time budget per test in seconds (0 disables the budget)
    #[serde(default)]
    pub timeout_secs: u64,

    /// Largest event payload accepted from a worker
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_max_frame_bytes() -> u64 {
    DEFAULT_MAX_FRAME
}

impl WorkerConfig {
    /// The per-test budget, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Which standard streams of the worker are rebound to collector pipes
#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub stdin: bool,

    #[serde(default)]
    pub stdout: bool,

    #[serde(default)]
    pub stderr: bool,

    /// Maximum bytes kept per captured stream
    #[serde(default = "default_capture_max_bytes")]
    pub max_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stdin: false,
            stdout: false,
            stderr: false,
            max_bytes: default_capture_max_bytes(),
        }
    }
}

fn default_capture_max_bytes() -> usize {
    1024 * 1024
}

impl CaptureConfig {
    /// Redirection flags for the transport layer
    pub fn redirect_set(&self) -> RedirectSet {
        let mut set = RedirectSet::empty();
        if self.stdin {
            set.insert(StdStream::Stdin);
        }
        if self.stdout {
            set.insert(StdStream::Stdout);
        }
        if self.stderr {
            set.insert(StdStream::Stderr);
        }
        set
    }
}

/// Console report settings
#[derive(Debug, Deserialize, Default)]
pub struct ReportConfig {
    /// Print a line when each test starts
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    /// Load configuration from an explicit path, or from the default config
    /// file
    ///
    /// Returns default configuration if no file exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.max_frame_bytes == 0 {
            return Err(super::Error::Config(
                "worker.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.worker.max_frame_bytes > MAX_FRAME_LIMIT {
            return Err(super::Error::Config(format!(
                "worker.max_frame_bytes must be at most {}",
                MAX_FRAME_LIMIT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.worker.timeout(), None);
        assert_eq!(config.worker.max_frame_bytes, DEFAULT_MAX_FRAME);
        assert!(config.capture.redirect_set().is_empty());
        assert!(!config.report.verbose);
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
[worker]
timeout_secs = 5
max_frame_bytes = 4096

[capture]
stdout = true
stderr = true
max_bytes = 128
"#,
        )
        .unwrap();

        assert_eq!(config.worker.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.worker.max_frame_bytes, 4096);
        let set = config.capture.redirect_set();
        assert!(set.contains(StdStream::Stdout));
        assert!(set.contains(StdStream::Stderr));
        assert!(!set.contains(StdStream::Stdin));
        assert_eq!(config.capture.max_bytes, 128);
    }

    #[test]
    fn test_invalid_config() {
        let err = Config::parse("[worker]\ntimeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_zero_frame_limit_rejected() {
        let err = Config::parse("[worker]\nmax_frame_bytes = 0").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_frame_limit_capped() {
        let at_limit = format!("[worker]\nmax_frame_bytes = {}", MAX_FRAME_LIMIT);
        assert_eq!(Config::parse(&at_limit).unwrap().worker.max_frame_bytes, MAX_FRAME_LIMIT);

        let err = Config::parse("[worker]\nmax_frame_bytes = 9223372036854775807").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, crate::Error::FileRead { .. }));
    }
}
