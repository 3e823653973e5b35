use opencode_sidecar_core::SidecarError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on `server.lock`, released on drop.
///
/// Serializes start/stop across tasks of this process and across unrelated
/// invocations sharing the install directory.
pub(crate) struct StateLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl StateLock {
    /// Blocks a worker thread, not the runtime, until the lock is ours
    pub(crate) async fn acquire(path: PathBuf) -> Result<Self, SidecarError> {
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&path))
            .await
            .map_err(|e| SidecarError::Other(anyhow::anyhow!("Lock task failed: {e}")))?
    }

    fn acquire_blocking(path: &Path) -> Result<Self, SidecarError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SidecarError::fs(path, e))?;

        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};
            let lock = Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| SidecarError::fs(path, std::io::Error::from(errno)))?;
            debug!(path = %path.display(), "Acquired state lock");
            Ok(Self { _lock: lock })
        }

        #[cfg(not(unix))]
        {
            file.lock().map_err(|e| SidecarError::fs(path, e))?;
            debug!(path = %path.display(), "Acquired state lock");
            Ok(Self { _file: file })
        }
    }
}
