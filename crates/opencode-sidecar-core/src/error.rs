use crate::process::ProcessError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error taxonomy of sidecar operations
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("binary not installed")]
    NotInstalled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid release index response: {0}")]
    Parse(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn sidecar process: {0}")]
    ProcessSpawn(String),

    /// Carries the last transport error seen while polling, or a generic timeout message
    #[error("{0}")]
    HealthCheckTimeout(String),

    #[error("No free port among {attempts} ports starting at {start}")]
    PortExhaustion { start: u16, attempts: u16 },

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SidecarError {
    pub fn fs(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SidecarError::FileSystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Stable identifier callers can map to user-facing messages
    pub fn kind(&self) -> &'static str {
        match self {
            SidecarError::NotInstalled => "not_installed",
            SidecarError::Network(_) => "network_error",
            SidecarError::Parse(_) => "parse_error",
            SidecarError::FileSystem { .. } => "filesystem_error",
            SidecarError::ProcessSpawn(_) => "process_spawn_error",
            SidecarError::HealthCheckTimeout(_) => "health_check_timeout",
            SidecarError::PortExhaustion { .. } => "port_exhaustion",
            SidecarError::Registration(_) => "registration_error",
            SidecarError::Configuration(_) => "configuration_error",
            SidecarError::Other(_) => "other",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SidecarError::Network(_)
                | SidecarError::HealthCheckTimeout(_)
                | SidecarError::Registration(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SidecarError::Configuration(_) | SidecarError::NotInstalled
        )
    }
}

impl From<ProcessError> for SidecarError {
    fn from(error: ProcessError) -> Self {
        SidecarError::ProcessSpawn(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_installed_message() {
        assert_eq!(SidecarError::NotInstalled.to_string(), "binary not installed");
        assert_eq!(SidecarError::NotInstalled.kind(), "not_installed");
    }

    #[test]
    fn test_health_timeout_carries_message_verbatim() {
        let error = SidecarError::HealthCheckTimeout("health check timed out".to_string());
        assert_eq!(error.to_string(), "health check timed out");
    }

    #[test]
    fn test_filesystem_display() {
        let error = SidecarError::fs(
            "/tmp/sidecar/server.pid",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let display = format!("{error}");
        assert!(display.contains("/tmp/sidecar/server.pid"));
        assert!(display.contains("denied"));
        assert_eq!(error.kind(), "filesystem_error");
    }

    #[test]
    fn test_error_categorization() {
        // Retryable errors
        assert!(SidecarError::Network("test".to_string()).is_retryable());
        assert!(SidecarError::HealthCheckTimeout("test".to_string()).is_retryable());
        assert!(SidecarError::Registration("test".to_string()).is_retryable());

        // Non-retryable errors
        assert!(!SidecarError::Parse("test".to_string()).is_retryable());
        assert!(!SidecarError::ProcessSpawn("test".to_string()).is_retryable());
        assert!(!SidecarError::NotInstalled.is_retryable());

        assert!(SidecarError::Configuration("test".to_string()).is_permanent());
        assert!(!SidecarError::Network("test".to_string()).is_permanent());
    }

    #[test]
    fn test_process_error_conversion() {
        let error: SidecarError = ProcessError::SpawnFailed("no pid".to_string()).into();
        assert!(matches!(error, SidecarError::ProcessSpawn(_)));
        assert!(error.to_string().contains("no pid"));
    }
}
