use backon::{ConstantBuilder, Retryable};
use opencode_sidecar_core::{HealthCheckConfig, HealthSnapshot, SidecarError};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    healthy: bool,
    #[serde(default)]
    version: Option<String>,
}

enum ProbeFailure {
    Unhealthy,
    Transport,
}

/// One health request. Any HTTP answer is a snapshot (healthy only for a 200
/// with `healthy: true`), only transport failures are errors.
pub async fn probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<HealthSnapshot, reqwest::Error> {
    let response = client.get(url).timeout(timeout).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        return Ok(HealthSnapshot {
            healthy: false,
            version: None,
        });
    }

    let snapshot = match response.json::<HealthBody>().await {
        Ok(body) => HealthSnapshot {
            healthy: body.healthy,
            version: body.version,
        },
        Err(_) => HealthSnapshot {
            healthy: false,
            version: None,
        },
    };
    Ok(snapshot)
}

/// Poll `url` at a fixed interval until it reports healthy or the startup
/// timeout elapses. The timeout error carries the last transport error seen.
pub async fn wait_until_healthy(
    client: &reqwest::Client,
    url: &str,
    config: &HealthCheckConfig,
) -> Result<HealthSnapshot, SidecarError> {
    info!(
        "Polling sidecar health at {} (every {}ms, up to {}ms)",
        url, config.poll_interval_ms, config.startup_timeout_ms
    );

    let last_error_slot: Mutex<Option<String>> = Mutex::new(None);
    let last_error = &last_error_slot;
    let attempt = || async move {
        match probe(client, url, config.request_timeout()).await {
            Ok(snapshot) if snapshot.healthy => Ok(snapshot),
            Ok(_) => Err(ProbeFailure::Unhealthy),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                if let Ok(mut slot) = last_error.lock() {
                    *slot = Some(e.to_string());
                }
                Err(ProbeFailure::Transport)
            }
        }
    };

    let poll = ConstantBuilder::default()
        .with_delay(config.poll_interval())
        .with_max_times(config.max_probes());

    let outcome = tokio::time::timeout(config.startup_timeout(), attempt.retry(poll)).await;
    match outcome {
        Ok(Ok(snapshot)) => {
            info!(version = ?snapshot.version, "Sidecar is healthy");
            Ok(snapshot)
        }
        Ok(Err(ProbeFailure::Unhealthy | ProbeFailure::Transport)) | Err(_) => {
            let message = last_error_slot
                .into_inner()
                .ok()
                .flatten()
                .unwrap_or_else(|| "health check timed out".to_string());
            Err(SidecarError::HealthCheckTimeout(message))
        }
    }
}
