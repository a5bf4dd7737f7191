use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::monitoring::types::{FailureReason, TargetStatus};

/// Convert SystemTime to Unix milliseconds
pub fn timestamp_to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Convert Unix milliseconds to SystemTime
pub fn millis_to_timestamp(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

/// Inclusive range of HTTP status codes that count as a healthy response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, status_code: u16) -> bool {
        (self.min..=self.max).contains(&status_code)
    }
}

impl Default for StatusRange {
    /// 2xx and 3xx
    fn default() -> Self {
        Self::new(200, 399)
    }
}

impl fmt::Display for StatusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl FromStr for StatusRange {
    type Err = String;

    /// Accepts `200-299` or a single code such as `204`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |raw: &str| {
            raw.trim().parse::<u16>().map_err(|_| format!("invalid status code: {raw:?}"))
        };

        match s.split_once('-') {
            Some((min, max)) => Ok(Self::new(parse(min)?, parse(max)?)),
            None => {
                let code = parse(s)?;
                Ok(Self::new(code, code))
            }
        }
    }
}

/// Target model - a monitored HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub expected_status: StatusRange,
    pub enabled: bool,
    /// Notification recipient (e.g. a Telegram chat id)
    pub owner_chat_id: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Target {
    /// Create a new target with a 60s interval and a 10s timeout
    pub fn new(url: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: None,
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            interval_seconds: 60,
            timeout_seconds: 10,
            expected_status: StatusRange::default(),
            enabled: true,
            owner_chat_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_interval(mut self, interval_seconds: u64, timeout_seconds: u64) -> Self {
        self.interval_seconds = interval_seconds;
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.url)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Persisted up/down state of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub target_uuid: Uuid,
    pub status: TargetStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition_at: Option<SystemTime>,
    /// Timestamp of the newest result folded into this state
    pub last_result_at: Option<SystemTime>,
}

impl TargetState {
    pub fn unknown(target_uuid: Uuid) -> Self {
        Self {
            target_uuid,
            status: TargetStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition_at: None,
            last_result_at: None,
        }
    }
}

/// Confirmed state change worth notifying about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// up (or unknown) -> down
    WentDown,
    /// down -> up
    Recovered,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::WentDown => "went_down",
            TransitionKind::Recovered => "recovered",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "went_down" => Ok(TransitionKind::WentDown),
            "recovered" => Ok(TransitionKind::Recovered),
            other => Err(format!("unknown transition kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Whether the dispatcher is done with the event
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// AlertEvent model - one confirmed transition and its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub uuid: Uuid,
    pub target_uuid: Uuid,
    pub kind: TransitionKind,
    pub occurred_at: SystemTime,
    /// Failure that confirmed a `WentDown` transition
    pub reason: Option<FailureReason>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub delivery_status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub delivered_at: Option<SystemTime>,
}

impl AlertEvent {
    pub fn new(target_uuid: Uuid, kind: TransitionKind, occurred_at: SystemTime) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            target_uuid,
            kind,
            occurred_at,
            reason: None,
            status_code: None,
            latency_ms: None,
            delivery_status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            delivered_at: None,
        }
    }
}

/// Aggregated view over a window of check results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    pub target_uuid: Uuid,
    pub since: SystemTime,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub average_latency_ms: Option<f64>,
}

impl UptimeSummary {
    /// Percentage of successful checks, `None` without data
    pub fn uptime_percentage(&self) -> Option<f64> {
        if self.total_checks == 0 {
            None
        } else {
            Some(self.successful_checks as f64 * 100.0 / self.total_checks as f64)
        }
    }
}
