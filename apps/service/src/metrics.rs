//! Metrics writer: appends check results to the time-series table.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::MetricsConfig;
use crate::database::Database;
use crate::database::models::UptimeSummary;
use crate::error::PersistenceError;
use crate::monitoring::CheckResult;
use crate::retry::{RetryPolicy, retry_with_backoff};

pub struct MetricsWriter {
    database: Arc<dyn Database>,
    policy: RetryPolicy,
}

impl MetricsWriter {
    pub fn new(database: Arc<dyn Database>, config: &MetricsConfig) -> Self {
        let policy = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_millis),
            Duration::from_secs(5),
        );
        Self { database, policy }
    }

    /// Store one result.
    ///
    /// Writes are upserts keyed by target and timestamp, so a redelivered
    /// result overwrites its earlier copy instead of adding a point.
    pub async fn record(&self, result: &CheckResult) -> Result<(), PersistenceError> {
        let outcome = retry_with_backoff(
            &self.policy,
            "metrics write",
            |_: &anyhow::Error| true,
            |_| self.database.save_result(result),
        )
        .await;

        match outcome {
            Ok(((), attempts)) => {
                debug!(target = %result.target_id, attempts, "Stored check result");
                Ok(())
            }
            Err((e, attempts)) => {
                let failure =
                    PersistenceError { target_id: result.target_id, attempts, message: format!("{e:#}") };
                error!("{}", failure);
                Err(failure)
            }
        }
    }

    pub async fn recent(&self, target_uuid: Uuid, limit: usize) -> anyhow::Result<Vec<CheckResult>> {
        self.database.get_recent_results(target_uuid, limit).await
    }

    pub async fn uptime(&self, target_uuid: Uuid, window: Duration) -> anyhow::Result<UptimeSummary> {
        let since = SystemTime::now().checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        self.database.get_uptime_summary(target_uuid, since).await
    }
}
