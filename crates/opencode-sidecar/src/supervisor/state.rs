use crate::layout::InstallLayout;
use opencode_sidecar_core::{ProcessId, ServerProcessState, SidecarError};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Reads and writes the pid/port/start-time files. Nothing read here is
/// trusted without a liveness check by the caller.
pub(crate) struct StateFiles<'a> {
    layout: &'a InstallLayout,
}

impl<'a> StateFiles<'a> {
    pub(crate) fn new(layout: &'a InstallLayout) -> Self {
        Self { layout }
    }

    /// Recorded pid. 0 and values a signal call would read as negative are
    /// treated as absent.
    pub(crate) async fn pid(&self) -> Option<ProcessId> {
        read_number(&self.layout.pid_file())
            .await
            .filter(|pid: &ProcessId| (1..=i32::MAX as ProcessId).contains(pid))
    }

    pub(crate) async fn port(&self) -> Option<u16> {
        read_number(&self.layout.port_file()).await
    }

    pub(crate) async fn started_at(&self) -> Option<u64> {
        read_number(&self.layout.started_file()).await
    }

    /// Full record, or `None` unless both pid and port are readable
    #[cfg(test)]
    pub(crate) async fn read(&self) -> Option<ServerProcessState> {
        Some(ServerProcessState {
            pid: self.pid().await?,
            port: self.port().await?,
            started_at: self.started_at().await,
            config_path: self.layout.config_file(),
            log_path: self.layout.log_file(),
        })
    }

    pub(crate) async fn write(&self, state: &ServerProcessState) -> Result<(), SidecarError> {
        write_file(&self.layout.pid_file(), state.pid.to_string()).await?;
        write_file(&self.layout.port_file(), state.port.to_string()).await?;
        match state.started_at {
            Some(started_at) => {
                write_file(&self.layout.started_file(), started_at.to_string()).await?
            }
            None => remove_quietly(&self.layout.started_file()).await,
        }
        Ok(())
    }

    pub(crate) async fn clear(&self) {
        for path in [
            self.layout.pid_file(),
            self.layout.port_file(),
            self.layout.started_file(),
        ] {
            remove_quietly(&path).await;
        }
    }
}

async fn read_number<T: FromStr>(path: &Path) -> Option<T> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse().ok()
}

async fn write_file(path: &Path, content: String) -> Result<(), SidecarError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| SidecarError::fs(path, e))
}

pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed state file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove state file"),
    }
}
