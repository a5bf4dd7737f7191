use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::time::timeout;
use tracing::debug;

use super::checker::Checker;
use super::types::{CheckResult, FailureReason};
use crate::database::models::Target;

/// Check worker - runs one probe against a target snapshot.
///
/// A failed probe is a regular result, never a worker error, and nothing is
/// retried here: the next cadence slot is the retry.
pub struct CheckWorker {
    checker: Arc<dyn Checker>,
}

impl CheckWorker {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Probe `target`, bounded by its timeout.
    ///
    /// When the timeout elapses the in-flight request future is dropped,
    /// which cancels it, and the result is recorded as a timeout.
    pub async fn probe(&self, target: &Target) -> CheckResult {
        let timestamp = SystemTime::now();
        let start = Instant::now();

        let outcome = timeout(target.timeout(), self.checker.check(target)).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_elapsed) => {
                CheckResult::failure(target.uuid, timestamp, latency_ms, None, FailureReason::Timeout)
            }
            Ok(Err(probe_error)) => {
                CheckResult::failure(target.uuid, timestamp, latency_ms, None, probe_error.into())
            }
            Ok(Ok(response)) if target.expected_status.contains(response.status_code) => {
                CheckResult::success(target.uuid, timestamp, latency_ms, response.status_code)
            }
            Ok(Ok(response)) => CheckResult::failure(
                target.uuid,
                timestamp,
                latency_ms,
                Some(response.status_code),
                FailureReason::UnexpectedStatus(response.status_code),
            ),
        };

        debug!(
            target = %target.uuid,
            success = result.is_success(),
            latency_ms,
            "Probe finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::monitoring::checker::ProbeResponse;

    struct FixedChecker(Result<ProbeResponse, ProbeError>);

    #[async_trait::async_trait]
    impl Checker for FixedChecker {
        async fn check(&self, _target: &Target) -> Result<ProbeResponse, ProbeError> {
            self.0.clone()
        }
    }

    struct HangingChecker;

    #[async_trait::async_trait]
    impl Checker for HangingChecker {
        async fn check(&self, _target: &Target) -> Result<ProbeResponse, ProbeError> {
            std::future::pending().await
        }
    }

    fn target() -> Target {
        Target::new("https://example.com").with_interval(5, 1)
    }

    #[tokio::test]
    async fn expected_status_is_success() {
        let worker = CheckWorker::new(Arc::new(FixedChecker(Ok(ProbeResponse { status_code: 200 }))));

        let result = worker.probe(&target()).await;
        assert!(result.is_success());
        assert_eq!(result.status_code, Some(200));
    }

    #[tokio::test]
    async fn status_outside_range_is_failure() {
        let worker = CheckWorker::new(Arc::new(FixedChecker(Ok(ProbeResponse { status_code: 500 }))));

        let result = worker.probe(&target()).await;
        assert_eq!(result.failure, Some(FailureReason::UnexpectedStatus(500)));
        assert_eq!(result.status_code, Some(500));
    }

    #[tokio::test]
    async fn probe_errors_become_failure_reasons() {
        let worker =
            CheckWorker::new(Arc::new(FixedChecker(Err(ProbeError::Dns("no such host".into())))));

        let result = worker.probe(&target()).await;
        assert_eq!(result.failure, Some(FailureReason::Dns("no such host".into())));
        assert_eq!(result.status_code, None);
    }

    #[tokio::test]
    async fn hanging_probe_is_cancelled_as_timeout() {
        let worker = CheckWorker::new(Arc::new(HangingChecker));

        let started = Instant::now();
        let result = worker.probe(&target()).await;

        assert_eq!(result.failure, Some(FailureReason::Timeout));
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert!(result.latency_ms >= 900);
    }
}
