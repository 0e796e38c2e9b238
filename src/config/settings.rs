use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default maximum log file size before rotation (10MB)
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Settings of the supervisor daemon itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// Directory for captured instance output
    pub log_dir: PathBuf,

    /// Filter used when `RUST_LOG` is not set
    pub log_level: String,

    /// Profile selected when the operator does not pass one
    pub default_profile: Option<String>,

    /// Log file size that triggers rotation
    pub max_log_size: u64,

    /// Lifecycle events buffered per subscriber
    pub event_buffer: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/warden.sock"),
            log_dir: PathBuf::from("/tmp/warden_logs"),
            log_level: "info".to_string(),
            default_profile: None,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            event_buffer: 256,
        }
    }
}

impl SupervisorSettings {
    /// Load settings: defaults, then the TOML file (if any), then `WARDEN_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os("WARDEN_CONFIG").map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(from_env);

        let mut settings = match path {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WardenError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents)
            .map_err(|e| WardenError::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Apply overrides looked up by variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("WARDEN_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(dir) = lookup("WARDEN_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("WARDEN_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(profile) = lookup("WARDEN_PROFILE") {
            self.default_profile = Some(profile).filter(|p| !p.is_empty());
        }
    }
}
