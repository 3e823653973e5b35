mod unix_process_manager;

pub use unix_process_manager::UnixProcessManager;

#[cfg(unix)]
use opencode_sidecar_core::ProcessManagerFactory;

pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
