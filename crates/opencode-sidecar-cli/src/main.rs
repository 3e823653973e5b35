use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use opencode_sidecar::{
    Registration, StartOptions, StartResponse, Supervisor, SupervisorConfig,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sidecarctl", version, about = "Install and supervise the OpenCode sidecar")]
struct Cli {
    /// Directory holding the binary and its state files
    #[arg(long, global = true, env = "OPENCODE_SIDECAR_DIR")]
    install_dir: Option<PathBuf>,

    /// JSON file with a full or partial supervisor configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Binary and process state
    Status {
        #[arg(long)]
        check_update: bool,
    },
    /// Platform and binary identity
    Platform,
    CheckUpdate,
    /// Download the latest release
    Install,
    Start(StartArgs),
    Stop,
    Restart(StartArgs),
    /// Install when missing, then start
    Ensure(StartArgs),
    /// Stop the sidecar and remove the install directory
    Cleanup,
    /// Record activity now
    Touch,
    /// Stop the sidecar when idle for longer than the threshold
    ReapIdle {
        #[arg(long, value_name = "SECS")]
        threshold: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// JSON object of provider credentials
    #[arg(long, value_name = "FILE")]
    providers: Option<PathBuf>,

    #[arg(long, value_name = "URL", requires = "token")]
    callback_url: Option<String>,

    #[arg(long, env = "OPENCODE_SIDECAR_TOKEN", hide_env_values = true, requires = "callback_url")]
    token: Option<String>,

    #[arg(long, requires = "callback_url")]
    name: Option<String>,
}

impl StartArgs {
    fn options(&self) -> Result<StartOptions> {
        let mut options = StartOptions::default();

        if let Some(path) = &self.providers {
            options = options.with_providers(read_providers(path)?);
        }

        if let (Some(url), Some(token)) = (&self.callback_url, &self.token) {
            let mut registration = Registration::new(url, token);
            if let Some(name) = &self.name {
                registration = registration.with_name(name);
            }
            options = options.with_registration(registration);
        }

        Ok(options)
    }
}

fn read_providers(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read providers file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON object", path.display()))
}

fn load_config(cli: &Cli) -> Result<SupervisorConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => SupervisorConfig::default(),
    };

    if let Some(dir) = &cli.install_dir {
        config.install_dir = dir.clone();
    }
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs the command and prints its result. `Ok(false)` means the command
/// reported a failure in its own output.
async fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;
    debug!(install_dir = %config.install_dir.display(), "Using install directory");
    let supervisor = Supervisor::new(config)?;

    match &cli.command {
        Command::Status { check_update } => {
            let reporter = supervisor.status_reporter();
            if *check_update {
                print_json(&reporter.status_with_update().await)?;
            } else {
                print_json(&reporter.status().await)?;
            }
        }
        Command::Platform => {
            print_json(&supervisor.release().platform_info().await)?;
        }
        Command::CheckUpdate => {
            print_json(&supervisor.release().check_for_update().await?)?;
        }
        Command::Install => {
            let installed = supervisor.release().install(None).await?;
            print_json(&json!({ "success": true, "installed": installed }))?;
        }
        Command::Start(args) => {
            let response = StartResponse::from(supervisor.start(&args.options()?).await);
            print_json(&response)?;
            return Ok(response.success);
        }
        Command::Restart(args) => {
            let response = StartResponse::from(supervisor.restart(&args.options()?).await);
            print_json(&response)?;
            return Ok(response.success);
        }
        Command::Ensure(args) => {
            let options = args.options()?;
            let response = StartResponse::from(supervisor.ensure_running(&options, None).await);
            print_json(&response)?;
            return Ok(response.success);
        }
        Command::Stop => {
            let outcome = supervisor.stop().await;
            print_json(&json!({ "success": true, "outcome": outcome }))?;
        }
        Command::Cleanup => {
            let outcome = supervisor.stop().await;
            supervisor.release().cleanup().await?;
            print_json(&json!({ "success": true, "outcome": outcome }))?;
        }
        Command::Touch => {
            supervisor.record_activity().await?;
            let last_activity = supervisor
                .activity()
                .last_activity()
                .await
                .map(|at| at.to_rfc3339());
            print_json(&json!({ "success": true, "lastActivity": last_activity }))?;
        }
        Command::ReapIdle { threshold } => {
            let threshold = threshold.map(Duration::from_secs);
            let idle_secs = supervisor.activity().seconds_since_activity().await;
            let stopped = supervisor.stop_if_inactive(threshold).await;
            print_json(&json!({
                "success": true,
                "stopped": stopped,
                "secondsSinceActivity": idle_secs,
            }))?;
        }
    }

    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let body = json!({ "success": false, "error": format!("{e:#}") });
            println!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
            );
            ExitCode::FAILURE
        }
    }
}
