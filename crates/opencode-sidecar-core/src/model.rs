use crate::error::SidecarError;
use crate::platform::{TargetArch, TargetOs};
use crate::process::ProcessId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Latest release as advertised by the release index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRelease {
    pub version: String,
    pub download_url: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledBinary {
    pub path: PathBuf,
    pub version: String,
    pub executable: bool,
}

/// What later, unrelated invocations know about a spawned sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProcessState {
    pub pid: ProcessId,
    pub port: u16,
    pub started_at: Option<u64>,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub available: bool,
    pub current: Option<String>,
    pub latest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub os: TargetOs,
    pub arch: TargetArch,
    pub binary_name: String,
    pub binary_dir: PathBuf,
    pub binary_path: PathBuf,
    pub is_installed: bool,
    pub version: Option<String>,
}

/// Status surface polled by UIs and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    pub pid: Option<ProcessId>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub binary_installed: bool,
    pub version: Option<String>,
}

impl ServerStatus {
    pub fn lifecycle(&self) -> LifecycleState {
        match (self.binary_installed, self.running, self.pid) {
            (_, true, _) => LifecycleState::Running,
            // A recorded pid whose process is gone
            (_, false, Some(_)) => LifecycleState::Crashed,
            (false, false, None) => LifecycleState::NotInstalled,
            (true, false, None) => LifecycleState::Stopped,
        }
    }
}

/// Observable lifecycle states. `Starting` and `Stopping` only exist while a
/// start or stop call holds the state lock, so snapshots never report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotInstalled,
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedServer {
    pub url: String,
    pub port: u16,
    pub version: Option<String>,
    pub status: StartStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing (alive) was recorded; stray state files were removed
    NotRunning,
    /// Exited after the graceful request
    Terminated,
    /// Needed the forceful kill
    Killed,
}

/// Progress stages reported by an install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Fetching,
    Downloading,
    Complete,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStage::Fetching => "fetching",
            InstallStage::Downloading => "downloading",
            InstallStage::Complete => "complete",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged `{success, ...}` rendering of a start attempt for HTTP handlers and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StartStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl From<Result<StartedServer, SidecarError>> for StartResponse {
    fn from(result: Result<StartedServer, SidecarError>) -> Self {
        match result {
            Ok(server) => StartResponse {
                success: true,
                url: Some(server.url),
                port: Some(server.port),
                version: server.version,
                status: Some(server.status),
                error: None,
                error_kind: None,
            },
            Err(error) => StartResponse {
                success: false,
                url: None,
                port: None,
                version: None,
                status: None,
                error: Some(error.to_string()),
                error_kind: Some(error.kind().to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(running: bool, pid: Option<u32>, installed: bool) -> ServerStatus {
        ServerStatus {
            running,
            pid,
            port: pid.map(|_| 4096),
            url: None,
            binary_installed: installed,
            version: None,
        }
    }

    #[test]
    fn test_status_surface_is_camel_case() {
        let value = serde_json::to_value(status(false, None, true)).unwrap();
        assert_eq!(value["binaryInstalled"], serde_json::json!(true));
        assert_eq!(value["pid"], serde_json::Value::Null);
    }

    #[test]
    fn test_lifecycle_derivation() {
        assert_eq!(status(false, None, false).lifecycle(), LifecycleState::NotInstalled);
        assert_eq!(status(false, None, true).lifecycle(), LifecycleState::Stopped);
        assert_eq!(status(true, Some(10), true).lifecycle(), LifecycleState::Running);
        assert_eq!(status(false, Some(10), true).lifecycle(), LifecycleState::Crashed);
    }

    #[test]
    fn test_start_response_failure() {
        let response = StartResponse::from(Err(SidecarError::NotInstalled));
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("binary not installed"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], serde_json::json!(false));
        assert!(json.get("url").is_none());
        assert_eq!(json["errorKind"], serde_json::json!("not_installed"));
    }

    #[test]
    fn test_start_response_success() {
        let response = StartResponse::from(Ok(StartedServer {
            url: "http://127.0.0.1:4096".to_string(),
            port: 4096,
            version: Some("1.0.0".to_string()),
            status: StartStatus::Started,
        }));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["port"], serde_json::json!(4096));
        assert_eq!(json["status"], serde_json::json!("started"));
        assert!(json.get("error").is_none());
    }
}
