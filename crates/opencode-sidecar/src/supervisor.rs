mod health;
mod lock;
mod port;
mod runtime_config;
mod state;

pub use health::probe as probe_health;
pub use port::{find_available_port, is_port_in_use};
pub use runtime_config::CONFIG_SCHEMA;

use crate::activity::ActivityMonitor;
use crate::factory;
use crate::layout::InstallLayout;
use crate::registration::{Registration, RegistrationClient};
use crate::release::{InstallProgress, ReleaseManager};
use crate::status::StatusReporter;
use backon::{ExponentialBuilder, Retryable};
use lock::StateLock;
use opencode_sidecar_core::{
    EscalationOutcome, ProcessId, ProcessManager, ServerProcessState, ServerStatus, SidecarError,
    SpawnRequest, StartStatus, StartedServer, StopOutcome, SupervisorConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use state::StateFiles;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-start inputs coming from the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    /// Provider credential map, written verbatim under `provider`
    #[serde(default)]
    pub providers: Map<String, Value>,

    /// Additional top-level entries for the runtime config
    #[serde(default)]
    pub extra_config: Map<String, Value>,

    /// Handshake performed once the sidecar is healthy. Skipped when the token is empty.
    #[serde(default)]
    pub registration: Option<Registration>,
}

impl StartOptions {
    pub fn with_providers(mut self, providers: Map<String, Value>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_extra_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_config.insert(key.into(), value);
        self
    }

    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }
}

/// Owns the lifecycle of the single sidecar instance that lives in an install
/// directory. Holds no in-memory process state: every call re-reads the state
/// files, so any number of short-lived supervisors can share one directory.
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    release: ReleaseManager,
    process_manager: Arc<dyn ProcessManager>,
    activity: ActivityMonitor,
    registration: RegistrationClient,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self, SidecarError> {
        Self::with_process_manager(config, factory::create_process_manager())
    }

    pub fn with_process_manager(
        config: SupervisorConfig,
        process_manager: Arc<dyn ProcessManager>,
    ) -> Result<Self, SidecarError> {
        config.validate()?;
        let config = Arc::new(config);

        let http = reqwest::Client::builder()
            .user_agent(config.network.user_agent.clone())
            .build()
            .map_err(|e| SidecarError::Network(format!("Failed to build HTTP client: {e}")))?;

        let release = ReleaseManager::with_client(config.clone(), http.clone());
        let activity = ActivityMonitor::new(release.layout().activity_file());
        let registration = RegistrationClient::new(
            http.clone(),
            config.registration_path.clone(),
            config.network.registration_timeout(),
        );

        debug!(
            install_dir = %config.install_dir.display(),
            platform = process_manager.platform_name(),
            "Supervisor created"
        );

        Ok(Self {
            config,
            release,
            process_manager,
            activity,
            registration,
            http,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn release(&self) -> &ReleaseManager {
        &self.release
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }

    pub fn process_manager(&self) -> &Arc<dyn ProcessManager> {
        &self.process_manager
    }

    pub fn status_reporter(&self) -> StatusReporter<'_> {
        StatusReporter::new(self)
    }

    fn layout(&self) -> &InstallLayout {
        self.release.layout()
    }

    fn url_for(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.bind_address, port)
    }

    /// Recorded pid, if that process is alive and is still the one we spawned
    async fn live_pid(&self) -> Option<ProcessId> {
        let files = StateFiles::new(self.layout());
        let pid = files.pid().await?;

        if !self.process_manager.is_alive(pid).await {
            debug!(pid = %pid, "Recorded sidecar process is gone");
            return None;
        }

        if let Some(recorded) = files.started_at().await {
            match self.process_manager.start_time(pid).await {
                // Clock granularity differs between readers
                Some(actual) if actual.abs_diff(recorded) > 1 => {
                    warn!(
                        pid = %pid,
                        recorded,
                        actual,
                        "Recorded pid now belongs to another process"
                    );
                    return None;
                }
                _ => {}
            }
        }

        Some(pid)
    }

    pub async fn is_running(&self) -> bool {
        self.live_pid().await.is_some()
    }

    /// `http://<bind>:<port>` of the running sidecar
    pub async fn server_url(&self) -> Option<String> {
        self.live_pid().await?;
        let port = StateFiles::new(self.layout()).port().await?;
        Some(self.url_for(port))
    }

    pub async fn find_available_port(&self, default_port: u16) -> u16 {
        find_available_port(
            &self.config.bind_address,
            default_port,
            self.config.port_probe_attempts,
            self.config.port_probe_timeout(),
        )
        .await
    }

    async fn install_dir_exists(&self) -> bool {
        tokio::fs::try_exists(self.layout().dir())
            .await
            .unwrap_or(false)
    }

    async fn lock(&self) -> Result<StateLock, SidecarError> {
        StateLock::acquire(self.layout().lock_file()).await
    }

    /// Start the sidecar unless it already runs. Returns once it answers its
    /// health endpoint; a sidecar that never does is stopped again.
    pub async fn start(&self, options: &StartOptions) -> Result<StartedServer, SidecarError> {
        // Nothing can be running, or installed, without the directory
        if !self.install_dir_exists().await {
            return Err(SidecarError::NotInstalled);
        }
        // Without a binary, only an already running sidecar is worth the lock file
        if !self.release.is_installed().await && !self.is_running().await {
            return Err(SidecarError::NotInstalled);
        }

        let _lock = self.lock().await?;
        self.start_locked(options).await
    }

    async fn start_locked(&self, options: &StartOptions) -> Result<StartedServer, SidecarError> {
        let layout = self.layout();
        let files = StateFiles::new(layout);

        if let Some(pid) = self.live_pid().await {
            match files.port().await {
                Some(port) => {
                    info!(pid = %pid, port, "Sidecar already running");
                    return Ok(StartedServer {
                        url: self.url_for(port),
                        port,
                        version: self.release.installed_version().await,
                        status: StartStatus::AlreadyRunning,
                    });
                }
                None => {
                    warn!(pid = %pid, "Running sidecar has no recorded port, replacing it");
                    self.stop_locked().await;
                }
            }
        }

        if !self.release.is_installed().await {
            return Err(SidecarError::NotInstalled);
        }

        let port = self.find_available_port(self.config.default_port).await;

        let config_path = layout.config_file();
        let runtime_config = runtime_config::render(&options.providers, &options.extra_config);
        runtime_config::write(&config_path, &runtime_config).await?;

        let spawned = self
            .process_manager
            .spawn_detached(&self.spawn_request(port))
            .await?;
        let started_at = match spawned.started_at {
            Some(started_at) => Some(started_at),
            None => self.process_manager.start_time(spawned.pid).await,
        };

        let state = ServerProcessState {
            pid: spawned.pid,
            port,
            started_at,
            config_path,
            log_path: layout.log_file(),
        };
        if let Err(e) = files.write(&state).await {
            warn!(pid = %spawned.pid, error = %e, "Failed to record sidecar state");
            self.stop_spawned(spawned.pid).await;
            return Err(e);
        }
        info!(pid = %spawned.pid, port, "Spawned sidecar");

        let url = self.url_for(port);
        let health_url = format!("{}{}", url, self.config.health.path);
        let snapshot =
            match health::wait_until_healthy(&self.http, &health_url, &self.config.health).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(pid = %spawned.pid, error = %e, "Sidecar failed its health check");
                    self.stop_locked().await;
                    return Err(e);
                }
            };

        if let Some(registration) = options
            .registration
            .as_ref()
            .filter(|registration| !registration.token.is_empty())
        {
            if let Err(e) = self.registration.register(&url, registration).await {
                warn!(error = %e, "Registration failed, sidecar keeps running");
            }
        }

        if let Err(e) = self.activity.record_activity().await {
            debug!(error = %e, "Failed to record activity");
        }

        Ok(StartedServer {
            url,
            port,
            version: snapshot.version,
            status: StartStatus::Started,
        })
    }

    fn spawn_request(&self, port: u16) -> SpawnRequest {
        let layout = self.layout();
        let mut args = vec![
            "serve".to_string(),
            format!("--port={port}"),
            format!("--hostname={}", self.config.bind_address),
        ];
        args.extend(self.config.args.iter().cloned());

        let mut env = self.config.env.clone();
        if self.config.isolate_home {
            let dir = layout.dir().to_string_lossy().into_owned();
            env.insert("HOME".to_string(), dir.clone());
            env.insert("OPENCODE_CONFIG_DIR".to_string(), dir);
        }

        SpawnRequest {
            program: layout.binary(),
            args,
            working_dir: Some(layout.dir().to_path_buf()),
            env,
            log_file: layout.log_file(),
        }
    }

    /// Stop the sidecar if one runs and remove its state files. Never fails.
    pub async fn stop(&self) -> StopOutcome {
        let lock = if self.install_dir_exists().await {
            match self.lock().await {
                Ok(lock) => Some(lock),
                Err(e) => {
                    warn!(error = %e, "Stopping without the state lock");
                    None
                }
            }
        } else {
            None
        };

        let outcome = self.stop_locked().await;
        drop(lock);
        outcome
    }

    /// Stop without taking the lock; callers already hold it
    async fn stop_locked(&self) -> StopOutcome {
        let outcome = match self.live_pid().await {
            Some(pid) => self.terminate(pid).await,
            None => StopOutcome::NotRunning,
        };

        StateFiles::new(self.layout()).clear().await;
        self.activity.clear().await;
        info!(outcome = ?outcome, "Sidecar stopped");
        outcome
    }

    /// Used when a process was spawned but its state could not be recorded
    async fn stop_spawned(&self, pid: ProcessId) {
        self.terminate(pid).await;
        StateFiles::new(self.layout()).clear().await;
    }

    async fn terminate(&self, pid: ProcessId) -> StopOutcome {
        match self
            .process_manager
            .terminate_with_escalation(pid, self.config.shutdown.grace_period())
            .await
        {
            EscalationOutcome::NotFound => StopOutcome::NotRunning,
            EscalationOutcome::Terminated => StopOutcome::Terminated,
            EscalationOutcome::Killed => StopOutcome::Killed,
            EscalationOutcome::Survived => {
                warn!(pid = %pid, "Sidecar still alive after forceful kill");
                StopOutcome::Killed
            }
        }
    }

    /// Stop then start, under a single hold of the state lock
    pub async fn restart(&self, options: &StartOptions) -> Result<StartedServer, SidecarError> {
        if !self.install_dir_exists().await {
            return Err(SidecarError::NotInstalled);
        }

        let _lock = self.lock().await?;
        self.stop_locked().await;
        self.start_locked(options).await
    }

    /// Install the binary when missing, then start
    pub async fn ensure_running(
        &self,
        options: &StartOptions,
        progress: Option<&InstallProgress<'_>>,
    ) -> Result<StartedServer, SidecarError> {
        if !self.release.is_installed().await {
            info!("Sidecar binary missing, installing");
            self.release.install(progress).await?;
        }
        self.start(options).await
    }

    /// Registration handshake against the running sidecar, retried per the
    /// configured retry policy
    pub async fn register(&self, registration: &Registration) -> Result<(), SidecarError> {
        let url = self
            .server_url()
            .await
            .ok_or_else(|| SidecarError::Registration("sidecar is not running".to_string()))?;

        if !self.config.retry.retries_enabled() {
            return self.registration.register(&url, registration).await;
        }

        (|| self.registration.register(&url, registration))
            .retry(self.retry_strategy())
            .when(|e: &SidecarError| e.is_retryable())
            .notify(|e: &SidecarError, delay: Duration| {
                debug!(error = %e, ?delay, "Retrying registration");
            })
            .await
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        let retry = &self.config.retry;

        let mut builder = ExponentialBuilder::default()
            .with_min_delay(retry.min_delay())
            .with_max_delay(retry.max_delay())
            .with_max_times(retry.retries());

        if !retry.use_exponential_backoff {
            builder = builder.with_factor(1.0);
        }
        if retry.jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    pub async fn record_activity(&self) -> Result<(), SidecarError> {
        self.activity.record_activity().await
    }

    /// Stop a running sidecar that saw no activity within `threshold`
    /// (default: the configured inactivity threshold). Returns whether it stopped one.
    pub async fn stop_if_inactive(&self, threshold: Option<Duration>) -> bool {
        let threshold = threshold.unwrap_or_else(|| self.config.inactivity_threshold());
        if !self.is_running().await || !self.activity.is_inactive(threshold).await {
            return false;
        }

        info!(
            threshold_secs = threshold.as_secs(),
            "Stopping inactive sidecar"
        );
        self.stop().await;
        true
    }

    /// Process side of the status surface. Reads only.
    pub async fn get_status(&self) -> ServerStatus {
        let files = StateFiles::new(self.layout());
        let pid = files.pid().await;
        let port = files.port().await;
        let running = self.live_pid().await.is_some();

        ServerStatus {
            running,
            pid,
            port,
            url: if running {
                port.map(|port| self.url_for(port))
            } else {
                None
            },
            binary_installed: self.release.is_installed().await,
            version: self.release.installed_version().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_options_deserialize() {
        let options: StartOptions = serde_json::from_value(serde_json::json!({
            "providers": {"anthropic": {"options": {"apiKey": "k"}}},
            "registration": {"callbackUrl": "https://example.test/mcp", "token": "t"}
        }))
        .unwrap();

        assert!(options.providers.contains_key("anthropic"));
        assert!(options.extra_config.is_empty());
        let registration = options.registration.unwrap();
        assert_eq!(registration.name, "wordforge");
        assert_eq!(registration.token, "t");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SupervisorConfig::with_install_dir("/tmp/sidecar");
        config.registration_path = "mcp".to_string();

        let error = Supervisor::new(config).err().unwrap();
        assert!(matches!(error, SidecarError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_spawn_request_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::builder()
            .install_dir(dir.path())
            .args(["--print-logs"])
            .env("OPENCODE_DISABLE_AUTOUPDATE", "1")
            .build()
            .unwrap();
        let supervisor = Supervisor::new(config).unwrap();

        let request = supervisor.spawn_request(4100);
        assert_eq!(
            request.args,
            vec!["serve", "--port=4100", "--hostname=127.0.0.1", "--print-logs"]
        );
        assert_eq!(request.working_dir.as_deref(), Some(dir.path()));
        assert_eq!(request.log_file, dir.path().join("server.log"));
        assert_eq!(
            request.env.get("HOME").map(String::as_str),
            dir.path().to_str()
        );
        assert_eq!(
            request.env.get("OPENCODE_CONFIG_DIR").map(String::as_str),
            dir.path().to_str()
        );
        assert_eq!(
            request.env.get("OPENCODE_DISABLE_AUTOUPDATE").map(String::as_str),
            Some("1")
        );
    }
}
