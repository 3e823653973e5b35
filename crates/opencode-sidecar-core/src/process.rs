use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// OS process identifier
pub type ProcessId = u32;

/// Everything needed to launch a detached sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Receives both stdout and stderr, truncated on spawn
    pub log_file: PathBuf,
}

/// A freshly spawned process, as reported by the spawn call itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: ProcessId,
    /// OS start time (seconds since the epoch), used to tell a reused pid apart
    pub started_at: Option<u64>,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal delivered / termination requested
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// How an escalating shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The process was already gone
    NotFound,
    /// Exited within the grace period
    Terminated,
    /// Needed a forceful kill
    Killed,
    /// Still alive after the forceful kill was requested
    Survived,
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Spawning and inspecting processes by pid
///
/// Handles are not kept between calls: every later invocation only knows the pid
/// (and start time) read back from disk, so the whole API is pid based.
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Start `request.program` detached from the caller, with output redirected
    /// to `request.log_file`, and return the pid reported by the spawn call
    async fn spawn_detached(&self, request: &SpawnRequest) -> Result<SpawnedProcess, ProcessError>;

    /// Whether a live (non-zombie) process with this pid exists
    async fn is_alive(&self, pid: ProcessId) -> bool;

    /// OS start time of `pid` in seconds since the epoch, if it can be read
    async fn start_time(&self, pid: ProcessId) -> Option<u64>;
}

/// Termination primitives
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Request a graceful exit (SIGTERM on Unix)
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult;

    /// Force kill (SIGKILL on Unix, `taskkill /F` on Windows)
    async fn force_kill(&self, pid: ProcessId) -> TerminationResult;
}

/// Platform process manager combining lifecycle and termination
#[async_trait]
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    fn platform_name(&self) -> &'static str;

    /// Graceful terminate, fixed grace period, then forceful kill if still alive
    async fn terminate_with_escalation(
        &self,
        pid: ProcessId,
        grace_period: Duration,
    ) -> EscalationOutcome {
        match self.terminate_gracefully(pid).await {
            TerminationResult::ProcessNotFound => return EscalationOutcome::NotFound,
            TerminationResult::Success => {
                tokio::time::sleep(grace_period).await;
                if !self.is_alive(pid).await {
                    return EscalationOutcome::Terminated;
                }
            }
            // Graceful termination failed, go straight to force kill
            TerminationResult::AccessDenied | TerminationResult::Failed(_) => {}
        }

        match self.force_kill(pid).await {
            TerminationResult::ProcessNotFound => EscalationOutcome::Terminated,
            _ => {
                // Give the kernel a moment to reap the process table entry
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.is_alive(pid).await {
                    EscalationOutcome::Survived
                } else {
                    EscalationOutcome::Killed
                }
            }
        }
    }
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
