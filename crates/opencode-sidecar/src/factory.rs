use opencode_sidecar_core::{ProcessManager, ProcessManagerFactory};
use std::sync::Arc;
use tracing::debug;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = opencode_sidecar_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = opencode_sidecar_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return opencode_sidecar_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return opencode_sidecar_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return opencode_sidecar_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return opencode_sidecar_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Shared, type-erased process manager for the current platform
pub fn create_process_manager() -> Arc<dyn ProcessManager> {
    debug!(
        platform = PlatformProcessManagerFactory::platform_name(),
        "Creating process manager"
    );
    Arc::new(PlatformProcessManagerFactory::create_process_manager())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformProcessManagerFactory::platform_name();
        println!("Running on platform: {platform}");

        let manager = create_process_manager();
        assert_eq!(manager.platform_name(), platform);
    }
}
