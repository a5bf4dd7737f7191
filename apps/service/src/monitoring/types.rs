use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

use crate::database::models::timestamp_to_millis;

/// Up/down status of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Up => write!(f, "up"),
            TargetStatus::Down => write!(f, "down"),
            TargetStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(TargetStatus::Up),
            "down" => Ok(TargetStatus::Down),
            "unknown" => Ok(TargetStatus::Unknown),
            other => Err(format!("unknown target status: {other}")),
        }
    }
}

/// Why a probe did not count as healthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Connection(String),
    Dns(String),
    Request(String),
    /// A response arrived, but outside the expected status range
    UnexpectedStatus(u16),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Connection(_) => "connection",
            FailureReason::Dns(_) => "dns",
            FailureReason::Request(_) => "request",
            FailureReason::UnexpectedStatus(_) => "unexpected_status",
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            FailureReason::Timeout => None,
            FailureReason::Connection(detail)
            | FailureReason::Dns(detail)
            | FailureReason::Request(detail) => Some(detail.clone()),
            FailureReason::UnexpectedStatus(code) => Some(code.to_string()),
        }
    }

    /// Rebuild a reason from its stored `(kind, detail)` columns
    pub fn from_parts(kind: &str, detail: Option<String>) -> Option<Self> {
        let detail_or_empty = || detail.clone().unwrap_or_default();
        match kind {
            "timeout" => Some(FailureReason::Timeout),
            "connection" => Some(FailureReason::Connection(detail_or_empty())),
            "dns" => Some(FailureReason::Dns(detail_or_empty())),
            "request" => Some(FailureReason::Request(detail_or_empty())),
            "unexpected_status" => detail
                .as_deref()
                .and_then(|code| code.parse().ok())
                .map(FailureReason::UnexpectedStatus),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Connection(detail) => write!(f, "connection error: {detail}"),
            FailureReason::Dns(detail) => write!(f, "dns error: {detail}"),
            FailureReason::Request(detail) => write!(f, "request error: {detail}"),
            FailureReason::UnexpectedStatus(code) => write!(f, "unexpected status code {code}"),
        }
    }
}

/// Result of a single probe against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// UUID of the target that was checked
    pub target_id: Uuid,

    /// When the probe started
    pub timestamp: SystemTime,

    /// Time until the response (or the failure) in milliseconds
    pub latency_ms: u64,

    /// HTTP status code, if a response arrived
    pub status_code: Option<u16>,

    /// Set when the probe did not succeed
    pub failure: Option<FailureReason>,
}

impl CheckResult {
    pub fn success(target_id: Uuid, timestamp: SystemTime, latency_ms: u64, status_code: u16) -> Self {
        Self { target_id, timestamp, latency_ms, status_code: Some(status_code), failure: None }
    }

    pub fn failure(
        target_id: Uuid,
        timestamp: SystemTime,
        latency_ms: u64,
        status_code: Option<u16>,
        reason: FailureReason,
    ) -> Self {
        Self { target_id, timestamp, latency_ms, status_code, failure: Some(reason) }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn timestamp_millis(&self) -> i64 {
        timestamp_to_millis(self.timestamp)
    }
}
