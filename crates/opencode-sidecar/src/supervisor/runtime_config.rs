use opencode_sidecar_core::SidecarError;
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub const CONFIG_SCHEMA: &str = "https://opencode.ai/config.json";

/// `{"$schema", "provider"}` plus any extra top-level entries. `provider` is
/// only present when there are providers. Both keys are reserved: extras of
/// the same name are dropped.
pub fn render(providers: &Map<String, Value>, extra: &Map<String, Value>) -> Value {
    let mut config = extra.clone();
    config.insert("$schema".to_string(), Value::String(CONFIG_SCHEMA.to_string()));
    if providers.is_empty() {
        config.remove("provider");
    } else {
        config.insert("provider".to_string(), Value::Object(providers.clone()));
    }
    Value::Object(config)
}

/// Write the config readable by the owner only, since it holds provider credentials
pub async fn write(path: &Path, config: &Value) -> Result<(), SidecarError> {
    let content = serde_json::to_vec_pretty(config)
        .map_err(|e| SidecarError::Other(anyhow::anyhow!("Failed to encode config: {e}")))?;

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| SidecarError::fs(path, e))?;
    file.write_all(&content)
        .await
        .map_err(|e| SidecarError::fs(path, e))?;
    file.flush().await.map_err(|e| SidecarError::fs(path, e))?;

    // `mode` only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| SidecarError::fs(path, e))?;
    }

    Ok(())
}
