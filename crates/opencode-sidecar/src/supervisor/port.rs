use opencode_sidecar_core::SidecarError;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Something accepted a TCP connection on `host:port` within `timeout`
pub async fn is_port_in_use(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// First port from `start` upwards that does not accept connections.
///
/// When all `attempts` ports are taken this falls back to a random port
/// 100..=999 above `start` without probing it.
pub async fn find_available_port(host: &str, start: u16, attempts: u16, timeout: Duration) -> u16 {
    for offset in 0..attempts {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        if !is_port_in_use(host, port, timeout).await {
            debug!(port, "Found available port");
            return port;
        }
    }

    let fallback = start.saturating_add(rand::random_range(100..=999u16));
    warn!(
        error = %SidecarError::PortExhaustion { start, attempts },
        fallback,
        "Falling back to an unprobed port"
    );
    fallback
}
