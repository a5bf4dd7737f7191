//! Error taxonomy of the check pipeline.
//!
//! Probe failures are data (they end up in a `CheckResult`), persistence and
//! delivery failures are retried by their owners before being surfaced.

use thiserror::Error;
use uuid::Uuid;

use crate::monitoring::types::FailureReason;

/// Why a single probe could not produce a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("request error: {0}")]
    Request(String),
}

impl From<ProbeError> for FailureReason {
    fn from(error: ProbeError) -> Self {
        match error {
            ProbeError::Timeout => FailureReason::Timeout,
            ProbeError::Connection(detail) => FailureReason::Connection(detail),
            ProbeError::Dns(detail) => FailureReason::Dns(detail),
            ProbeError::Request(detail) => FailureReason::Request(detail),
        }
    }
}

/// A check result could not be written to the time-series store
#[derive(Debug, Error)]
#[error("failed to persist result for target {target_id} after {attempts} attempt(s): {message}")]
pub struct PersistenceError {
    pub target_id: Uuid,
    pub attempts: u32,
    pub message: String,
}

/// An alert event could not be delivered
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery of alert {event_id} failed after {attempts} attempt(s): {message}")]
    Exhausted { event_id: Uuid, attempts: u32, message: String },
    #[error("alert {0} no longer exists")]
    EventMissing(Uuid),
    #[error("target {0} of the alert no longer exists")]
    TargetMissing(Uuid),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
