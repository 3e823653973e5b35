use chrono::{DateTime, TimeZone, Utc};
use opencode_sidecar_core::SidecarError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Last-activity timestamp kept on disk (`.activity`, Unix seconds), so an
/// idle sidecar can be reaped by whichever invocation notices first
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    path: PathBuf,
}

impl ActivityMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn record_activity(&self) -> Result<(), SidecarError> {
        self.record_at(Utc::now()).await
    }

    pub async fn record_at(&self, at: DateTime<Utc>) -> Result<(), SidecarError> {
        tokio::fs::write(&self.path, at.timestamp().to_string())
            .await
            .map_err(|e| SidecarError::fs(&self.path, e))
    }

    pub async fn last_activity(&self) -> Option<DateTime<Utc>> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        let seconds: i64 = content.trim().parse().ok()?;
        Utc.timestamp_opt(seconds, 0).single()
    }

    pub async fn seconds_since_activity(&self) -> Option<i64> {
        let last = self.last_activity().await?;
        Some((Utc::now() - last).num_seconds().max(0))
    }

    /// Never recorded counts as inactive
    pub async fn is_inactive(&self, threshold: Duration) -> bool {
        match self.seconds_since_activity().await {
            Some(elapsed) => elapsed >= threshold.as_secs() as i64,
            None => true,
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %e, "Failed to clear activity marker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_recorded_is_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(dir.path().join(".activity"));

        assert_eq!(monitor.last_activity().await, None);
        assert_eq!(monitor.seconds_since_activity().await, None);
        assert!(monitor.is_inactive(Duration::from_secs(1800)).await);
    }

    #[tokio::test]
    async fn test_recent_activity_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(dir.path().join(".activity"));

        monitor.record_activity().await.unwrap();
        assert!(monitor.seconds_since_activity().await.unwrap() <= 1);
        assert!(!monitor.is_inactive(Duration::from_secs(1800)).await);
    }

    #[tokio::test]
    async fn test_old_activity_is_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(dir.path().join(".activity"));

        monitor
            .record_at(Utc::now() - chrono::Duration::seconds(3600))
            .await
            .unwrap();
        assert!(monitor.seconds_since_activity().await.unwrap() >= 3600);
        assert!(monitor.is_inactive(Duration::from_secs(1800)).await);
        assert!(!monitor.is_inactive(Duration::from_secs(7200)).await);

        monitor.clear().await;
        assert_eq!(monitor.last_activity().await, None);
        monitor.clear().await;
    }
}
