//! Automatic retention and cleanup of stored history.
//!
//! This module manages data lifecycle:
//! - Check results: deleted after `result_days` (default 30)
//! - Delivered/failed alert events: deleted after `alert_days` (default 90)
//!
//! Pending alert events are never removed. Cleanup runs periodically
//! (every hour by default) as a background task.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::Database;

/// Retention policy for stored history
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep check results
    pub result_days: i64,
    /// Days to keep settled alert events
    pub alert_days: i64,
    /// Time between two sweeps
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            result_days: config.result_days,
            alert_days: config.alert_days,
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
        }
    }
}

impl RetentionPolicy {
    fn cutoff(days: i64, now: SystemTime) -> SystemTime {
        let now: chrono::DateTime<chrono::Utc> = now.into();
        (now - chrono::Duration::days(days.max(0))).into()
    }

    pub fn result_cutoff(&self, now: SystemTime) -> SystemTime {
        Self::cutoff(self.result_days, now)
    }

    pub fn alert_cutoff(&self, now: SystemTime) -> SystemTime {
        Self::cutoff(self.alert_days, now)
    }
}

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub results: u64,
    pub alerts: u64,
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Run one sweep relative to `now`
    pub async fn cleanup_expired(&self, now: SystemTime) -> Result<RetentionReport> {
        let result_cutoff = self.policy.result_cutoff(now);
        let alert_cutoff = self.policy.alert_cutoff(now);

        debug!(
            "Cleaning up results older than {} days and settled alerts older than {} days",
            self.policy.result_days, self.policy.alert_days
        );

        let report = RetentionReport {
            results: self.database.delete_results_before(result_cutoff).await?,
            alerts: self.database.delete_settled_alerts_before(alert_cutoff).await?,
        };

        info!(
            "Retention cleanup completed: {} results, {} alert events deleted",
            report.results, report.alerts
        );
        Ok(report)
    }

    /// Start background cleanup task
    pub fn start_periodic_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let database = Arc::clone(&self.database);
        let policy = self.policy.clone();

        tokio::spawn(async move {
            let period = policy.sweep_interval;
            let cleanup = RetentionCleanup::new(database, policy);
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                if let Err(e) = cleanup.cleanup_expired(SystemTime::now()).await {
                    warn!("Periodic retention cleanup failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.result_days, 30);
        assert_eq!(policy.alert_days, 90);
        assert_eq!(policy.sweep_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_cutoff_calculation() {
        let policy = RetentionPolicy { result_days: 7, alert_days: 14, sweep_interval: Duration::from_secs(60) };
        let now = UNIX_EPOCH + Duration::from_secs(100 * 86_400);

        assert_eq!(policy.result_cutoff(now), UNIX_EPOCH + Duration::from_secs(93 * 86_400));
        assert_eq!(policy.alert_cutoff(now), UNIX_EPOCH + Duration::from_secs(86 * 86_400));
    }
}
