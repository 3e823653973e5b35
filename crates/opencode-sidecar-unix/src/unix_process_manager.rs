use async_trait::async_trait;
use opencode_sidecar_core::{
    ProcessError, ProcessId, ProcessLifecycle, ProcessManager, ProcessTermination, SpawnRequest,
    SpawnedProcess, TerminationResult,
};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::fs::File;
    use std::process::Stdio;
    use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
    use tokio::process::Command;
    use tracing::{debug, info, warn};

    /// Unix process manager working purely on pids, so that processes spawned by
    /// an earlier invocation can be inspected and stopped by a later one
    pub struct UnixProcessManager;

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UnixProcessManager {
        pub fn new() -> Self {
            debug!("Initializing Unix process manager");
            Self
        }

        fn inspect<T>(pid: ProcessId, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
            let sys_pid = Pid::from_u32(pid);
            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
            system.process(sys_pid).map(f)
        }

        /// 0 and values past `i32::MAX` would address a process group or every
        /// process rather than a single pid
        fn nix_pid(pid: ProcessId) -> Option<NixPid> {
            match i32::try_from(pid) {
                Ok(raw) if raw > 0 => Some(NixPid::from_raw(raw)),
                _ => None,
            }
        }

        /// Signal the process group first (the sidecar leads its own group),
        /// then fall back to the single pid for processes we did not spawn
        fn send(pid: ProcessId, sig: Signal) -> TerminationResult {
            let Some(nix_pid) = Self::nix_pid(pid) else {
                warn!("Refusing to send {} to invalid pid {}", sig, pid);
                return TerminationResult::ProcessNotFound;
            };
            let result = match signal::killpg(nix_pid, sig) {
                Ok(()) => Ok(()),
                Err(Errno::ESRCH) | Err(Errno::EPERM) => signal::kill(nix_pid, sig),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!("Sent {} to process {}", sig, pid);
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!("Permission denied to signal process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send {} to process {}: {}", sig, pid, e);
                    TerminationResult::Failed(format!("{sig} failed: {e}"))
                }
            }
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        async fn spawn_detached(
            &self,
            request: &SpawnRequest,
        ) -> Result<SpawnedProcess, ProcessError> {
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

            // Own process group so the sidecar survives the caller and can be
            // signalled as a whole
            cmd.process_group(0);

            let child = cmd.spawn()?;
            let pid = child.id().ok_or_else(|| {
                ProcessError::SpawnFailed(format!(
                    "{} exited before reporting a pid",
                    request.program.display()
                ))
            })?;
            // Dropping the handle leaves the process running; tokio reaps it on exit
            drop(child);

            info!(
                "Spawned Unix process: {} (PID: {}) with args: {:?}",
                request.program.display(),
                pid,
                request.args
            );

            Ok(SpawnedProcess {
                pid,
                started_at: Self::inspect(pid, |p| p.start_time()),
            })
        }

        async fn is_alive(&self, pid: ProcessId) -> bool {
            let Some(nix_pid) = Self::nix_pid(pid) else {
                return false;
            };
            match signal::kill(nix_pid, None) {
                // A zombie still answers signal 0 but is not running
                Ok(()) => Self::inspect(pid, |p| p.status() != ProcessStatus::Zombie)
                    .unwrap_or(true),
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }

        async fn start_time(&self, pid: ProcessId) -> Option<u64> {
            Self::inspect(pid, |p| p.start_time())
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
            Self::send(pid, Signal::SIGTERM)
        }

        async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
            Self::send(pid, Signal::SIGKILL)
        }
    }

    #[async_trait]
    impl ProcessManager for UnixProcessManager {
        fn platform_name(&self) -> &'static str {
            "Unix"
        }
    }
}

#[cfg(unix)]
pub use unix_impl::UnixProcessManager;

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use opencode_sidecar_core::EscalationOutcome;
    use std::collections::HashMap;
    use std::time::Duration;

    fn request(dir: &tempfile::TempDir, program: &str, args: &[&str]) -> SpawnRequest {
        SpawnRequest {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: Some(dir.path().to_path_buf()),
            env: HashMap::new(),
            log_file: dir.path().join("server.log"),
        }
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UnixProcessManager::new();

        let spawned = manager
            .spawn_detached(&request(&dir, "sleep", &["30"]))
            .await
            .unwrap();

        assert!(manager.is_alive(spawned.pid).await);
        assert!(spawned.started_at.is_some());
        assert_eq!(manager.start_time(spawned.pid).await, spawned.started_at);
        assert!(dir.path().join("server.log").exists());

        let outcome = manager
            .terminate_with_escalation(spawned.pid, Duration::from_millis(500))
            .await;
        assert_eq!(outcome, EscalationOutcome::Terminated);
        assert!(!manager.is_alive(spawned.pid).await);
    }

    #[tokio::test]
    async fn test_escalates_to_kill_when_sigterm_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UnixProcessManager::new();

        let spawned = manager
            .spawn_detached(&request(&dir, "sh", &["-c", "trap '' TERM; sleep 30"]))
            .await
            .unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = manager
            .terminate_with_escalation(spawned.pid, Duration::from_millis(300))
            .await;
        assert_eq!(outcome, EscalationOutcome::Killed);
        assert!(!manager.is_alive(spawned.pid).await);
    }

    #[tokio::test]
    async fn test_output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UnixProcessManager::new();

        let spawned = manager
            .spawn_detached(&request(&dir, "sh", &["-c", "echo out; echo err >&2"]))
            .await
            .unwrap();

        for _ in 0..50 {
            if !manager.is_alive(spawned.pid).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let log = std::fs::read_to_string(dir.path().join("server.log")).unwrap();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[tokio::test]
    async fn test_unknown_pid() {
        let manager = UnixProcessManager::new();
        // Above the default pid_max on Linux and macOS
        let pid = 4_194_304 + 17;

        assert!(!manager.is_alive(pid).await);
        assert_eq!(manager.start_time(pid).await, None);
        assert_eq!(
            manager.terminate_gracefully(pid).await,
            TerminationResult::ProcessNotFound
        );
        assert_eq!(
            manager
                .terminate_with_escalation(pid, Duration::from_millis(10))
                .await,
            EscalationOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_pids_that_do_not_name_one_process() {
        let manager = UnixProcessManager::new();

        // 0 is the caller's own group, u32::MAX would wrap to -1 (every process)
        for pid in [0, i32::MAX as u32 + 1, u32::MAX] {
            assert!(!manager.is_alive(pid).await, "pid {pid}");
            assert_eq!(
                manager.terminate_gracefully(pid).await,
                TerminationResult::ProcessNotFound
            );
            assert_eq!(
                manager.force_kill(pid).await,
                TerminationResult::ProcessNotFound
            );
            assert_eq!(
                manager
                    .terminate_with_escalation(pid, Duration::from_millis(10))
                    .await,
                EscalationOutcome::NotFound
            );
        }
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UnixProcessManager::new();

        let result = manager
            .spawn_detached(&request(&dir, "/nonexistent/opencode-linux-x64", &[]))
            .await;
        assert!(result.is_err());
    }
}
