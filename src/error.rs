use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Descriptor errors
    #[error("Invalid descriptor '{name}': {}", .violations.join("; "))]
    Validation {
        name: String,
        violations: Vec<String>,
    },

    #[error("Invalid descriptor file: {0}")]
    InvalidDescriptorFile(String),

    // Instance errors
    #[error("Failed to launch {0}: {1}")]
    Launch(String, String),

    #[error("Lost track of {0}: {1}")]
    Monitor(String, String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Process already running: {0}")]
    AlreadyRunning(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Supervisor errors
    #[error("Supervisor is not running")]
    SupervisorGone,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    // Log errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = WardenError::Validation {
            name: "api".to_string(),
            violations: vec![
                "instances must be at least 1".to_string(),
                "profile 'staging' is not defined".to_string(),
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("'api'"));
        assert!(msg.contains("instances must be at least 1"));
        assert!(msg.contains("profile 'staging' is not defined"));
    }

    #[test]
    fn test_launch_error_message() {
        let err = WardenError::Launch("api#0".to_string(), "permission denied".to_string());
        assert_eq!(err.to_string(), "Failed to launch api#0: permission denied");
    }
}
