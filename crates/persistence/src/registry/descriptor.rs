//! Per-backend registry state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::BackendKind;
use crate::registry::BackendEntry;

/// Registry view of one configured database instance.
///
/// `is_healthy`, `observed_size_mb` and `is_primary` change only through
/// probing or an administrative switch. Descriptors are never removed; a
/// retired backend is deactivated instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    /// Stable identifier.
    pub id: String,

    /// Human-readable name.
    pub display_name: String,

    /// Database driver.
    pub kind: BackendKind,

    /// Connection string. Never serialized.
    #[serde(skip_serializing, default)]
    pub connection: String,

    /// Failover rank; lower is preferred.
    pub priority: i32,

    /// Soft size ceiling in megabytes.
    pub capacity_limit_mb: u64,

    /// Last measured size; `None` until the first successful probe.
    pub observed_size_mb: Option<f64>,

    /// Administratively enabled.
    pub is_active: bool,

    /// Last probe succeeded.
    pub is_healthy: bool,

    /// Current write target.
    pub is_primary: bool,

    /// When the last probe finished.
    pub last_health_check_at: Option<DateTime<Utc>>,

    /// Error reported by the last failed probe.
    pub last_error: Option<String>,

    /// Latency of the last successful probe.
    pub response_time_ms: Option<u64>,

    /// Failed probes since the last success.
    pub consecutive_failures: u32,
}

impl BackendDescriptor {
    /// Builds the boot-time descriptor for a configuration entry.
    ///
    /// A backend is assumed healthy until a probe says otherwise.
    pub fn from_entry(entry: &BackendEntry) -> Self {
        Self {
            id: entry.id.clone(),
            display_name: entry.display_name().to_string(),
            kind: entry.kind,
            connection: entry.connection.clone(),
            priority: entry.priority,
            capacity_limit_mb: entry.capacity_limit_mb,
            observed_size_mb: None,
            is_active: entry.enabled,
            is_healthy: true,
            is_primary: entry.primary && entry.enabled,
            last_health_check_at: None,
            last_error: None,
            response_time_ms: None,
            consecutive_failures: 0,
        }
    }

    /// Returns `observed_size_mb / capacity_limit_mb`, if a size is known.
    pub fn usage_ratio(&self) -> Option<f64> {
        let size = self.observed_size_mb?;
        if self.capacity_limit_mb == 0 {
            return Some(f64::INFINITY);
        }
        Some(size / self.capacity_limit_mb as f64)
    }

    /// Returns usage as a percentage, or 0 when no size is known.
    pub fn usage_percent(&self) -> f64 {
        self.usage_ratio().map(|r| r * 100.0).unwrap_or(0.0)
    }

    /// Returns true if the known usage is at or above `threshold`.
    pub fn is_over(&self, threshold: f64) -> bool {
        self.usage_ratio().is_some_and(|r| r >= threshold)
    }

    /// Records a successful probe.
    pub fn record_success(&mut self, size_mb: f64, response_time_ms: u64) {
        if !self.is_healthy {
            info!(
                backend = %self.id,
                failures = self.consecutive_failures,
                "Backend recovered"
            );
        }
        self.is_healthy = true;
        self.observed_size_mb = Some(size_mb);
        self.response_time_ms = Some(response_time_ms);
        self.last_error = None;
        self.consecutive_failures = 0;
        self.last_health_check_at = Some(Utc::now());
    }

    /// Records a failed probe. The observed size is left as it was.
    pub fn record_failure(&mut self, error: String) {
        if self.is_healthy {
            warn!(backend = %self.id, error = %error, "Backend marked unhealthy");
        }
        self.is_healthy = false;
        self.last_error = Some(error);
        self.consecutive_failures += 1;
        self.last_health_check_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> BackendDescriptor {
        BackendDescriptor::from_entry(
            &BackendEntry::new("db-1", BackendKind::Sqlite, "secret.db")
                .with_capacity_mb(100)
                .as_primary(),
        )
    }

    #[test]
    fn test_from_entry() {
        let d = descriptor();
        assert!(d.is_primary);
        assert!(d.is_active);
        assert!(d.is_healthy);
        assert_eq!(d.display_name, "db-1");
        assert_eq!(d.usage_ratio(), None);
        assert!(!d.is_over(0.9));
    }

    #[test]
    fn test_disabled_entry_is_never_primary() {
        let d = BackendDescriptor::from_entry(
            &BackendEntry::new("db-1", BackendKind::Sqlite, ":memory:")
                .as_primary()
                .disabled(),
        );
        assert!(!d.is_primary);
        assert!(!d.is_active);
    }

    #[test]
    fn test_usage() {
        let mut d = descriptor();
        d.record_success(91.0, 3);
        assert!((d.usage_ratio().unwrap() - 0.91).abs() < 1e-9);
        assert!(d.is_over(0.9));
        assert!((d.usage_percent() - 91.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_keeps_stale_size() {
        let mut d = descriptor();
        d.record_success(40.0, 2);
        d.record_failure("connection refused".to_string());
        d.record_failure("connection refused".to_string());

        assert!(!d.is_healthy);
        assert_eq!(d.observed_size_mb, Some(40.0));
        assert_eq!(d.consecutive_failures, 2);
        assert!(d.last_health_check_at.is_some());

        d.record_success(41.0, 2);
        assert!(d.is_healthy);
        assert_eq!(d.consecutive_failures, 0);
        assert_eq!(d.last_error, None);
    }

    #[test]
    fn test_connection_is_not_serialized() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert!(json.get("connection").is_none());
        assert_eq!(json["capacityLimitMb"], 100);
        assert_eq!(json["isPrimary"], true);
    }
}
