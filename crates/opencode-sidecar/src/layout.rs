use std::path::{Path, PathBuf};

/// File names inside the install directory. The directory is the only channel
/// between unrelated invocations, so every component resolves paths here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    dir: PathBuf,
    binary_name: String,
}

impl InstallLayout {
    pub const VERSION_FILE: &'static str = ".version";
    pub const PID_FILE: &'static str = "server.pid";
    pub const PORT_FILE: &'static str = "server.port";
    pub const STARTED_FILE: &'static str = "server.started";
    pub const LOCK_FILE: &'static str = "server.lock";
    pub const CONFIG_FILE: &'static str = "opencode.json";
    pub const LOG_FILE: &'static str = "server.log";
    pub const ACTIVITY_FILE: &'static str = ".activity";
    pub const ACCESS_MARKER: &'static str = ".htaccess";

    pub fn new(dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            binary_name: binary_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    pub fn binary(&self) -> PathBuf {
        self.dir.join(&self.binary_name)
    }

    pub fn version_file(&self) -> PathBuf {
        self.dir.join(Self::VERSION_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join(Self::PID_FILE)
    }

    pub fn port_file(&self) -> PathBuf {
        self.dir.join(Self::PORT_FILE)
    }

    pub fn started_file(&self) -> PathBuf {
        self.dir.join(Self::STARTED_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(Self::LOCK_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(Self::CONFIG_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join(Self::LOG_FILE)
    }

    pub fn activity_file(&self) -> PathBuf {
        self.dir.join(Self::ACTIVITY_FILE)
    }

    pub fn access_marker(&self) -> PathBuf {
        self.dir.join(Self::ACCESS_MARKER)
    }
}
