#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use opencode_sidecar::{
    ProcessError, ProcessId, ProcessLifecycle, ProcessManager, ProcessTermination,
    SpawnRequest, SpawnedProcess, SupervisorConfig, TerminationResult,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

/// How a fake sidecar answers its health endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Healthy { version: String },
    /// Answers `{"healthy": false}` forever
    Unhealthy,
    /// Never binds its port
    Silent,
}

struct FakeProcess {
    server: Option<JoinHandle<()>>,
    started_at: u64,
}

#[derive(Clone)]
struct ServerState {
    version: String,
    healthy: bool,
    registrations: Arc<Mutex<Vec<Value>>>,
    registration_status: Arc<AtomicU16>,
}

/// In-process stand-in for the OS: "processes" are axum servers on the
/// requested port, signals are bookkeeping
pub struct FakeProcessManager {
    behavior: Mutex<Behavior>,
    ignore_sigterm: AtomicBool,
    processes: Mutex<HashMap<ProcessId, FakeProcess>>,
    start_time_overrides: Mutex<HashMap<ProcessId, u64>>,
    next_pid: AtomicU32,
    pub spawns: AtomicUsize,
    pub terms: AtomicUsize,
    pub kills: AtomicUsize,
    pub last_request: Mutex<Option<SpawnRequest>>,
    pub registrations: Arc<Mutex<Vec<Value>>>,
    registration_status: Arc<AtomicU16>,
}

impl FakeProcessManager {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ignore_sigterm: AtomicBool::new(false),
            processes: Mutex::new(HashMap::new()),
            start_time_overrides: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(900_000),
            spawns: AtomicUsize::new(0),
            terms: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            registrations: Arc::new(Mutex::new(Vec::new())),
            registration_status: Arc::new(AtomicU16::new(200)),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::new(Behavior::Healthy {
            version: "1.2.3".to_string(),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn ignore_sigterm(&self, ignore: bool) {
        self.ignore_sigterm.store(ignore, Ordering::SeqCst);
    }

    pub fn fail_registrations_with(&self, status: u16) {
        self.registration_status.store(status, Ordering::SeqCst);
    }

    /// Pretend an unrelated process with this pid exists
    pub fn adopt(&self, pid: ProcessId, started_at: u64) {
        self.processes.lock().unwrap().insert(
            pid,
            FakeProcess {
                server: None,
                started_at,
            },
        );
    }

    /// Make the OS report a different start time for `pid`, as after pid reuse
    pub fn override_start_time(&self, pid: ProcessId, started_at: u64) {
        self.start_time_overrides
            .lock()
            .unwrap()
            .insert(pid, started_at);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn alive_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    fn remove(&self, pid: ProcessId) -> bool {
        match self.processes.lock().unwrap().remove(&pid) {
            Some(process) => {
                if let Some(server) = process.server {
                    server.abort();
                }
                true
            }
            None => false,
        }
    }

    fn port_from(request: &SpawnRequest) -> u16 {
        request
            .args
            .iter()
            .find_map(|arg| arg.strip_prefix("--port="))
            .and_then(|port| port.parse().ok())
            .expect("spawn request carries --port=")
    }
}

#[async_trait]
impl ProcessLifecycle for FakeProcessManager {
    async fn spawn_detached(&self, request: &SpawnRequest) -> Result<SpawnedProcess, ProcessError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if !request.program.exists() {
            return Err(ProcessError::SpawnFailed(format!(
                "{} does not exist",
                request.program.display()
            )));
        }
        std::fs::write(&request.log_file, "fake sidecar log\n")?;

        let behavior = self.behavior.lock().unwrap().clone();
        let server = match behavior {
            Behavior::Silent => None,
            Behavior::Healthy { version } => {
                Some(self.serve(Self::port_from(request), version, true).await?)
            }
            Behavior::Unhealthy => {
                Some(self.serve(Self::port_from(request), String::new(), false).await?)
            }
        };

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let started_at = 1_700_000_000 + pid as u64;
        self.processes
            .lock()
            .unwrap()
            .insert(pid, FakeProcess { server, started_at });

        Ok(SpawnedProcess {
            pid,
            started_at: Some(started_at),
        })
    }

    async fn is_alive(&self, pid: ProcessId) -> bool {
        self.processes.lock().unwrap().contains_key(&pid)
    }

    async fn start_time(&self, pid: ProcessId) -> Option<u64> {
        if let Some(overridden) = self.start_time_overrides.lock().unwrap().get(&pid) {
            return Some(*overridden);
        }
        self.processes
            .lock()
            .unwrap()
            .get(&pid)
            .map(|process| process.started_at)
    }
}

impl FakeProcessManager {
    async fn serve(
        &self,
        port: u16,
        version: String,
        healthy: bool,
    ) -> Result<JoinHandle<()>, ProcessError> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let state = ServerState {
            version,
            healthy,
            registrations: self.registrations.clone(),
            registration_status: self.registration_status.clone(),
        };

        let router = Router::new()
            .route("/global/health", get(health))
            .route("/mcp", post(register))
            .with_state(state);

        Ok(tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        }))
    }
}

async fn health(State(state): State<ServerState>) -> Json<Value> {
    if state.healthy {
        Json(json!({"healthy": true, "version": state.version}))
    } else {
        Json(json!({"healthy": false}))
    }
}

async fn register(State(state): State<ServerState>, Json(body): Json<Value>) -> StatusCode {
    state.registrations.lock().unwrap().push(body);
    StatusCode::from_u16(state.registration_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[async_trait]
impl ProcessTermination for FakeProcessManager {
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
        if !self.is_alive(pid).await {
            return TerminationResult::ProcessNotFound;
        }
        self.terms.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_sigterm.load(Ordering::SeqCst) {
            self.remove(pid);
        }
        TerminationResult::Success
    }

    async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.remove(pid) {
            TerminationResult::Success
        } else {
            TerminationResult::ProcessNotFound
        }
    }
}

#[async_trait]
impl ProcessManager for FakeProcessManager {
    fn platform_name(&self) -> &'static str {
        "Fake"
    }
}

/// A port nothing listens on right now
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Fast timings so failure paths finish quickly
pub async fn test_config(dir: &Path) -> SupervisorConfig {
    let mut config = SupervisorConfig::with_install_dir(dir);
    config.default_port = free_port().await;
    config.port_probe_attempts = 20;
    config.health.startup_timeout_ms = 1_000;
    config.health.poll_interval_ms = 50;
    config.health.request_timeout_ms = 200;
    config.shutdown.grace_period_ms = 100;
    config
}

/// Put an executable file where the binary is expected
pub fn install_fake_binary(config: &SupervisorConfig, version: &str) {
    let binary = config
        .install_dir
        .join(config.platform().binary_name(&config.binary_prefix));
    std::fs::create_dir_all(&config.install_dir).unwrap();
    std::fs::write(&binary, b"#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    std::fs::write(config.install_dir.join(".version"), version).unwrap();
}
