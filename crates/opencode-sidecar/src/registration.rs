use opencode_sidecar_core::SidecarError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_REGISTRATION_NAME: &str = "wordforge";

/// Callback endpoint the sidecar should use to reach the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default = "default_name")]
    pub name: String,
    pub callback_url: String,
    pub token: String,
}

fn default_name() -> String {
    DEFAULT_REGISTRATION_NAME.to_string()
}

impl Registration {
    pub fn new(callback_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            callback_url: callback_url.into(),
            token: token.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Request body understood by the sidecar's admin API
    pub fn payload(&self) -> Value {
        json!({
            "name": self.name,
            "config": {
                "type": "remote",
                "url": self.callback_url,
                "headers": {
                    "Authorization": format!("Bearer {}", self.token),
                },
            },
        })
    }
}

/// Performs the registration handshake against a running sidecar
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    client: reqwest::Client,
    path: String,
    timeout: Duration,
}

impl RegistrationClient {
    pub fn new(client: reqwest::Client, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            path: path.into(),
            timeout,
        }
    }

    pub fn endpoint(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }

    pub async fn register(
        &self,
        base_url: &str,
        registration: &Registration,
    ) -> Result<(), SidecarError> {
        let endpoint = self.endpoint(base_url);
        debug!(endpoint = %endpoint, name = %registration.name, "Registering callback");

        let response = self
            .client
            .post(&endpoint)
            .json(&registration.payload())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SidecarError::Registration(format!("POST {endpoint} failed: {e}")))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(SidecarError::Registration(format!(
                "POST {endpoint} returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        info!(name = %registration.name, "Callback registered with sidecar");
        Ok(())
    }
}
