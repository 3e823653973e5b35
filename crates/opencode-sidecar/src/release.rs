use crate::layout::InstallLayout;
use futures_util::StreamExt;
use opencode_sidecar_core::{
    BinaryRelease, InstallStage, InstalledBinary, PlatformInfo, SidecarError, SupervisorConfig,
    UpdateInfo,
};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Synchronous install progress observer. It only reports, it cannot cancel.
pub type InstallProgress<'a> = dyn Fn(InstallStage, &str) + Send + Sync + 'a;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct LatestRelease {
    #[serde(default)]
    tag_name: Option<String>,
}

/// Acquires, versions and removes the sidecar binary
#[derive(Clone)]
pub struct ReleaseManager {
    config: Arc<SupervisorConfig>,
    layout: InstallLayout,
    client: reqwest::Client,
}

impl ReleaseManager {
    pub fn new(config: Arc<SupervisorConfig>) -> Result<Self, SidecarError> {
        let client = reqwest::Client::builder()
            .user_agent(config.network.user_agent.clone())
            .build()
            .map_err(|e| SidecarError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Arc<SupervisorConfig>, client: reqwest::Client) -> Self {
        let binary_name = config.platform().binary_name(&config.binary_prefix);
        let layout = InstallLayout::new(config.install_dir.clone(), binary_name);
        Self {
            config,
            layout,
            client,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn binary_name(&self) -> &str {
        self.layout.binary_name()
    }

    pub fn binary_path(&self) -> PathBuf {
        self.layout.binary()
    }

    /// Query the release index for the newest published version
    pub async fn fetch_latest_release(&self) -> Result<BinaryRelease, SidecarError> {
        let url = self.config.release.latest_release_url();
        debug!(url = %url, "Fetching latest release");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .timeout(self.config.network.fetch_timeout())
            .send()
            .await
            .map_err(|e| SidecarError::Network(format!("Failed to fetch release info: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(SidecarError::Network(format!(
                "Release index returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SidecarError::Network(format!("Failed to read release info: {e}")))?;
        let latest: LatestRelease = serde_json::from_str(&body)
            .map_err(|e| SidecarError::Parse(format!("Release info is not valid JSON: {e}")))?;

        let tag = latest
            .tag_name
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| SidecarError::Parse("Release info has no tag_name".to_string()))?;
        let version = tag.strip_prefix('v').unwrap_or(&tag).to_string();
        let download_url = self
            .config
            .release
            .download_url(&version, self.layout.binary_name());

        Ok(BinaryRelease {
            version,
            download_url,
            tag,
        })
    }

    pub async fn check_for_update(&self) -> Result<UpdateInfo, SidecarError> {
        let latest = self.fetch_latest_release().await?;
        let current = self.installed_version().await;
        let available = match &current {
            Some(current) => is_newer(&latest.version, current),
            None => true,
        };

        Ok(UpdateInfo {
            available,
            current,
            latest: latest.version,
        })
    }

    /// Download the latest release and swap it in atomically. The previous
    /// binary stays in place until the new one is fully written.
    pub async fn install(
        &self,
        progress: Option<&InstallProgress<'_>>,
    ) -> Result<InstalledBinary, SidecarError> {
        let report = |stage: InstallStage, message: String| {
            info!(stage = %stage, "{}", message);
            if let Some(progress) = progress {
                progress(stage, &message);
            }
        };

        let release = self.fetch_latest_release().await?;
        report(
            InstallStage::Fetching,
            format!("Fetching OpenCode v{}...", release.version),
        );

        let dir = self.layout.dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SidecarError::fs(dir, e))?;
        self.write_access_marker().await?;

        report(InstallStage::Downloading, "Downloading binary...".to_string());
        let download = tokio::time::timeout(
            self.config.network.download_timeout(),
            self.download_to_temp(&release.download_url),
        )
        .await
        .map_err(|_| {
            SidecarError::Network(format!(
                "Download timed out after {}s",
                self.config.network.download_timeout_secs
            ))
        })??;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&download, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| SidecarError::fs(&download, e))?;
        }

        let binary = self.layout.binary();
        download
            .persist(&binary)
            .map_err(|e| SidecarError::fs(&binary, e.error))?;

        // Only a binary that made it into place gets a version marker
        write_atomic(dir, &self.layout.version_file(), release.version.as_bytes())?;

        report(
            InstallStage::Complete,
            format!("OpenCode v{} installed", release.version),
        );

        Ok(InstalledBinary {
            path: binary,
            version: release.version,
            executable: true,
        })
    }

    /// Stream `url` into a temporary file next to the binary. The file is
    /// removed again when the returned path is dropped without being persisted.
    async fn download_to_temp(&self, url: &str) -> Result<tempfile::TempPath, SidecarError> {
        let dir = self.layout.dir();
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(dir)
            .map_err(|e| SidecarError::fs(dir, e))?;
        let (file, path) = temp.into_parts();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SidecarError::Network(format!("Failed to download binary: {e}")))?;
        if !response.status().is_success() {
            return Err(SidecarError::Network(format!(
                "Download returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let mut file = tokio::fs::File::from_std(file);
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| SidecarError::Network(format!("Download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SidecarError::fs(&path, e))?;
            written += chunk.len();
        }
        file.flush().await.map_err(|e| SidecarError::fs(&path, e))?;
        file.sync_all().await.map_err(|e| SidecarError::fs(&path, e))?;

        debug!(bytes = written, "Download complete");
        Ok(path)
    }

    async fn write_access_marker(&self) -> Result<(), SidecarError> {
        let marker = self.layout.access_marker();
        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::write(&marker, "Deny from all\n")
            .await
            .map_err(|e| SidecarError::fs(&marker, e))
    }

    /// Binary present and, off Windows, executable
    pub async fn is_installed(&self) -> bool {
        let Ok(metadata) = tokio::fs::metadata(self.layout.binary()).await else {
            return false;
        };
        metadata.is_file() && is_executable(&metadata)
    }

    pub async fn installed_version(&self) -> Option<String> {
        let content = tokio::fs::read_to_string(self.layout.version_file())
            .await
            .ok()?;
        let version = content.trim();
        (!version.is_empty()).then(|| version.to_string())
    }

    pub async fn installed_binary(&self) -> Option<InstalledBinary> {
        if !self.is_installed().await {
            return None;
        }
        Some(InstalledBinary {
            path: self.layout.binary(),
            version: self.installed_version().await?,
            executable: true,
        })
    }

    /// Remove the install directory with everything in it
    pub async fn cleanup(&self) -> Result<(), SidecarError> {
        let dir = self.layout.dir();
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(dir = %dir.display(), "Removed install directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to remove install directory");
                Err(SidecarError::fs(dir, e))
            }
        }
    }

    pub async fn platform_info(&self) -> PlatformInfo {
        let platform = self.config.platform();
        PlatformInfo {
            os: platform.os,
            arch: platform.arch,
            binary_name: self.layout.binary_name().to_string(),
            binary_dir: self.layout.dir().to_path_buf(),
            binary_path: self.layout.binary(),
            is_installed: self.is_installed().await,
            version: self.installed_version().await,
        }
    }
}

/// Semver comparison, falling back to plain inequality when either side does
/// not parse
pub fn is_newer(latest: &str, current: &str) -> bool {
    match (
        semver::Version::parse(latest.trim_start_matches('v')),
        semver::Version::parse(current.trim_start_matches('v')),
    ) {
        (Ok(latest), Ok(current)) => latest > current,
        _ => latest != current,
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Write `content` to `target` through a temporary file in `dir` and a rename
pub(crate) fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<(), SidecarError> {
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SidecarError::fs(dir, e))?;
    temp.write_all(content)
        .map_err(|e| SidecarError::fs(temp.path(), e))?;
    temp.persist(target)
        .map_err(|e| SidecarError::fs(target, e.error))?;
    Ok(())
}
