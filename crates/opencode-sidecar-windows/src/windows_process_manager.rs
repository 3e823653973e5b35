use anyhow::Result;
use async_trait::async_trait;
use std::fs::File;
use std::process::Stdio;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{info, warn};

use opencode_sidecar_core::*;

/// Windows process manager. Liveness comes from the process table, termination
/// goes through `taskkill`.
pub struct WindowsProcessManager;

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }

    fn inspect<T>(pid: ProcessId, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system.process(sys_pid).map(f)
    }

    /// Run taskkill against `pid`. `Ok(false)` means taskkill found nothing to kill.
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.extend(["/F", "/T"]);
        }

        let output = Command::new("taskkill").args(&args).output().await?;

        Ok(output.status.success())
    }

    async fn run_taskkill(&self, pid: ProcessId, force: bool) -> TerminationResult {
        if !self.is_alive(pid).await {
            return TerminationResult::ProcessNotFound;
        }
        match self.taskkill(pid, force).await {
            Ok(true) => {
                info!(pid = %pid, force, "taskkill succeeded");
                TerminationResult::Success
            }
            Ok(false) if !self.is_alive(pid).await => TerminationResult::ProcessNotFound,
            Ok(false) => {
                warn!(pid = %pid, force, "taskkill reported failure");
                TerminationResult::Failed("taskkill reported failure".to_string())
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to run taskkill");
                TerminationResult::Failed(format!("taskkill failed: {e}"))
            }
        }
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    async fn spawn_detached(&self, request: &SpawnRequest) -> Result<SpawnedProcess, ProcessError> {
        let log = File::create(&request.log_file)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);

        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        // No console window, and a group of its own so console control events
        // aimed at the caller do not reach the sidecar
        #[cfg(windows)]
        {
            use windows::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};
            cmd.creation_flags(CREATE_NO_WINDOW.0 | CREATE_NEW_PROCESS_GROUP.0);
        }

        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            ProcessError::SpawnFailed(format!(
                "{} exited before reporting a pid",
                request.program.display()
            ))
        })?;
        drop(child);

        info!(
            pid = %pid,
            program = %request.program.display(),
            args = ?request.args,
            "Spawned Windows process"
        );

        Ok(SpawnedProcess {
            pid,
            started_at: Self::inspect(pid, |p| p.start_time()),
        })
    }

    async fn is_alive(&self, pid: ProcessId) -> bool {
        Self::inspect(pid, |_| ()).is_some()
    }

    async fn start_time(&self, pid: ProcessId) -> Option<u64> {
        Self::inspect(pid, |p| p.start_time())
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
        self.run_taskkill(pid, false).await
    }

    async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
        self.run_taskkill(pid, true).await
    }
}

#[async_trait]
impl ProcessManager for WindowsProcessManager {
    fn platform_name(&self) -> &'static str {
        "Windows"
    }
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WindowsProcessManager::new();
        let request = SpawnRequest {
            program: "ping".into(),
            args: vec!["-n".to_string(), "30".to_string(), "127.0.0.1".to_string()],
            working_dir: None,
            env: HashMap::new(),
            log_file: dir.path().join("server.log"),
        };

        let spawned = manager.spawn_detached(&request).await.unwrap();
        assert!(manager.is_alive(spawned.pid).await);

        let outcome = manager
            .terminate_with_escalation(spawned.pid, Duration::from_millis(500))
            .await;
        assert!(matches!(
            outcome,
            EscalationOutcome::Terminated | EscalationOutcome::Killed
        ));
        assert!(!manager.is_alive(spawned.pid).await);
    }
}
