use crate::supervisor::Supervisor;
use opencode_sidecar_core::{LifecycleState, PlatformInfo, ServerStatus, UpdateInfo};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Binary and process state in one read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSnapshot {
    pub release: PlatformInfo,
    pub process: ServerStatus,
    pub lifecycle: LifecycleState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusWithUpdate {
    #[serde(flatten)]
    pub snapshot: SidecarSnapshot,
    pub update: Option<UpdateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_error: Option<String>,
}

/// Read-only view over a supervisor. Never writes, never spawns.
pub struct StatusReporter<'a> {
    supervisor: &'a Supervisor,
}

impl<'a> StatusReporter<'a> {
    pub fn new(supervisor: &'a Supervisor) -> Self {
        Self { supervisor }
    }

    pub async fn status(&self) -> SidecarSnapshot {
        let release = self.supervisor.release().platform_info().await;
        let process = self.supervisor.get_status().await;
        let lifecycle = process.lifecycle();

        SidecarSnapshot {
            release,
            process,
            lifecycle,
        }
    }

    /// Status plus an update check. A failing check is reported, not raised.
    pub async fn status_with_update(&self) -> StatusWithUpdate {
        let snapshot = self.status().await;
        let (update, update_error) = match self.supervisor.release().check_for_update().await {
            Ok(update) => (Some(update), None),
            Err(e) => {
                debug!(error = %e, "Update check failed");
                (None, Some(e.to_string()))
            }
        };

        StatusWithUpdate {
            snapshot,
            update,
            update_error,
        }
    }
}
