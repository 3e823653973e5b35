use crate::error::SidecarError;
use crate::platform::Platform;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for retry logic used by network operations that may be retried
/// independently of a start (registration handshake)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Minimum delay between retry attempts (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between retry attempts (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of attempts (1 means a single attempt, no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether to use exponential backoff (true) or fixed delay (false)
    #[serde(default = "default_use_exponential_backoff")]
    pub use_exponential_backoff: bool,

    /// Whether to randomize delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            use_exponential_backoff: default_use_exponential_backoff(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Retry quickly and often, for a sidecar that is known to be starting up
    pub fn aggressive() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 2_000,
            max_attempts: 5,
            use_exponential_backoff: true,
            jitter: true,
        }
    }

    pub fn conservative() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 2_000,
            max_attempts: 2,
            use_exponential_backoff: false,
            jitter: false,
        }
    }

    /// A single attempt, fail fast
    pub fn no_retry() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: 1,
            use_exponential_backoff: false,
            jitter: false,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be at least 1"));
        }

        if self.max_attempts > 10 {
            return Err(anyhow::anyhow!(
                "max_attempts should not exceed 10 to avoid excessive retries"
            ));
        }

        if self.max_delay_ms > 60_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Number of retries after the first attempt
    pub fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }

    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

/// Health polling performed right after the sidecar is spawned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Total time the sidecar gets to report healthy
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Fixed delay between two probes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout of a single probe request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            path: default_health_path(),
        }
    }
}

impl HealthCheckConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Upper bound on the number of probes that fit in the startup window
    pub fn max_probes(&self) -> usize {
        let interval = self.poll_interval_ms.max(1);
        (self.startup_timeout_ms / interval) as usize + 1
    }
}

/// Escalating shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownConfig {
    /// Time between the graceful terminate request and the forceful kill
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Timeouts and identification for outbound HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            registration_timeout_secs: default_registration_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl NetworkConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

/// Where releases of the sidecar binary are published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSource {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_repo")]
    pub repo: String,
}

impl Default for ReleaseSource {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            download_base_url: default_download_base_url(),
            owner: default_owner(),
            repo: default_repo(),
        }
    }
}

impl ReleaseSource {
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    pub fn download_url(&self, version: &str, binary_name: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/v{}/{}",
            self.download_base_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            version,
            binary_name
        )
    }
}

/// Main supervisor configuration
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Private, non web-servable directory holding the binary and all state files
    #[builder(setter(into), default = "default_install_dir()")]
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    #[builder(default)]
    #[serde(default)]
    pub release: ReleaseSource,

    #[builder(setter(into), default = "default_binary_prefix()")]
    #[serde(default = "default_binary_prefix")]
    pub binary_prefix: String,

    /// Overrides host detection, mostly useful for tests
    #[builder(setter(strip_option), default)]
    #[serde(default)]
    pub platform: Option<Platform>,

    #[builder(setter(into), default = "default_bind_address()")]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[builder(default = "default_port()")]
    #[serde(default = "default_port")]
    pub default_port: u16,

    #[builder(default = "default_port_probe_attempts()")]
    #[serde(default = "default_port_probe_attempts")]
    pub port_probe_attempts: u16,

    #[builder(default = "default_port_probe_timeout_ms()")]
    #[serde(default = "default_port_probe_timeout_ms")]
    pub port_probe_timeout_ms: u64,

    #[builder(default)]
    #[serde(default)]
    pub health: HealthCheckConfig,

    #[builder(default)]
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[builder(default)]
    #[serde(default)]
    pub network: NetworkConfig,

    #[builder(default)]
    #[serde(default)]
    pub retry: RetryConfig,

    #[builder(setter(into), default = "default_registration_path()")]
    #[serde(default = "default_registration_path")]
    pub registration_path: String,

    /// Point `HOME` and `OPENCODE_CONFIG_DIR` of the sidecar at the install dir
    #[builder(default = "true")]
    #[serde(default = "default_isolate_home")]
    pub isolate_home: bool,

    #[builder(default = "default_inactivity_threshold_secs()")]
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,

    /// Extra arguments appended after the `serve` arguments
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the sidecar
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            release: ReleaseSource::default(),
            binary_prefix: default_binary_prefix(),
            platform: None,
            bind_address: default_bind_address(),
            default_port: default_port(),
            port_probe_attempts: default_port_probe_attempts(),
            port_probe_timeout_ms: default_port_probe_timeout_ms(),
            health: HealthCheckConfig::default(),
            shutdown: ShutdownConfig::default(),
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            registration_path: default_registration_path(),
            isolate_home: default_isolate_home(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    /// Configuration rooted at `install_dir` with every other value defaulted
    pub fn with_install_dir(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            ..Self::default()
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    pub fn port_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.port_probe_timeout_ms)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn validate(&self) -> Result<(), SidecarError> {
        self.retry
            .validate()
            .map_err(|e| SidecarError::Configuration(format!("Invalid retry config: {e}")))?;

        if self.install_dir.as_os_str().is_empty() {
            return Err(SidecarError::Configuration(
                "install_dir must not be empty".to_string(),
            ));
        }

        if self.binary_prefix.is_empty() {
            return Err(SidecarError::Configuration(
                "binary_prefix must not be empty".to_string(),
            ));
        }

        if self.default_port == 0 {
            return Err(SidecarError::Configuration(
                "default_port must be a concrete port".to_string(),
            ));
        }

        if self.port_probe_attempts == 0 {
            return Err(SidecarError::Configuration(
                "port_probe_attempts must be at least 1".to_string(),
            ));
        }

        if self.health.poll_interval_ms == 0 {
            return Err(SidecarError::Configuration(
                "health poll interval must be positive".to_string(),
            ));
        }

        if self.health.poll_interval_ms > self.health.startup_timeout_ms {
            return Err(SidecarError::Configuration(
                "health poll interval cannot exceed the startup timeout".to_string(),
            ));
        }

        if !self.registration_path.starts_with('/') {
            return Err(SidecarError::Configuration(
                "registration_path must start with '/'".to_string(),
            ));
        }

        Ok(())
    }
}

impl SupervisorConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// `<local data dir>/opencode-sidecar`, falling back to the working directory
pub fn default_install_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opencode-sidecar")
}

// Default value functions for serde
fn default_min_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_use_exponential_backoff() -> bool {
    true
}
fn default_jitter() -> bool {
    true
}
fn default_startup_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_request_timeout_ms() -> u64 {
    2_000
}
fn default_health_path() -> String {
    "/global/health".to_string()
}
fn default_grace_period_ms() -> u64 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_download_timeout_secs() -> u64 {
    300
}
fn default_registration_timeout_secs() -> u64 {
    5
}
fn default_user_agent() -> String {
    format!("opencode-sidecar/{}", env!("CARGO_PKG_VERSION"))
}
fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_download_base_url() -> String {
    "https://github.com".to_string()
}
fn default_owner() -> String {
    "sst".to_string()
}
fn default_repo() -> String {
    "opencode".to_string()
}
fn default_binary_prefix() -> String {
    "opencode".to_string()
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4096
}
fn default_port_probe_attempts() -> u16 {
    100
}
fn default_port_probe_timeout_ms() -> u64 {
    100
}
fn default_registration_path() -> String {
    "/mcp".to_string()
}
fn default_isolate_home() -> bool {
    true
}
fn default_inactivity_threshold_secs() -> u64 {
    1_800
}
