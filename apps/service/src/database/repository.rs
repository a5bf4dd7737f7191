use anyhow::{Result, anyhow};
use async_trait::async_trait;
use libsql::{Row, params};
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

use super::models::{
    AlertEvent, DeliveryStatus, StatusRange, Target, TargetState, UptimeSummary,
    millis_to_timestamp, timestamp_to_millis,
};
use crate::monitoring::types::{CheckResult, FailureReason};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all targets, enabled or not
    async fn list_targets(&self) -> Result<Vec<Target>>;

    /// Get all enabled targets
    async fn get_enabled_targets(&self) -> Result<Vec<Target>>;

    /// Get a target by UUID
    async fn get_target(&self, uuid: Uuid) -> Result<Option<Target>>;

    /// Insert or update a target, returning its row id
    async fn save_target(&self, target: &Target) -> Result<i64>;

    /// Delete a target with its results, state and alerts
    async fn delete_target(&self, uuid: Uuid) -> Result<bool>;

    /// Pause or resume a single target
    async fn set_target_enabled(&self, uuid: Uuid, enabled: bool) -> Result<bool>;

    /// Pause or resume every target
    async fn set_all_targets_enabled(&self, enabled: bool) -> Result<u64>;

    /// Store a check result; replaying the same `(target, timestamp)` overwrites it
    async fn save_result(&self, result: &CheckResult) -> Result<()>;

    /// Most recent results first
    async fn get_recent_results(&self, target_uuid: Uuid, limit: usize) -> Result<Vec<CheckResult>>;

    async fn count_results(&self, target_uuid: Uuid) -> Result<u64>;

    async fn get_uptime_summary(&self, target_uuid: Uuid, since: SystemTime) -> Result<UptimeSummary>;

    async fn delete_results_before(&self, cutoff: SystemTime) -> Result<u64>;

    async fn load_target_state(&self, target_uuid: Uuid) -> Result<Option<TargetState>>;

    async fn save_target_state(&self, state: &TargetState) -> Result<()>;

    async fn insert_alert_event(&self, event: &AlertEvent) -> Result<()>;

    async fn get_alert_event(&self, uuid: Uuid) -> Result<Option<AlertEvent>>;

    /// Events still waiting for delivery, oldest first
    async fn get_pending_alert_events(&self) -> Result<Vec<AlertEvent>>;

    async fn list_alert_events(&self, target_uuid: Uuid, limit: usize) -> Result<Vec<AlertEvent>>;

    /// Record the outcome of a delivery run
    async fn update_alert_delivery(
        &self,
        uuid: Uuid,
        status: DeliveryStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Remove delivered/failed events older than `cutoff`
    async fn delete_settled_alerts_before(&self, cutoff: SystemTime) -> Result<u64>;
}

const TARGET_COLUMNS: &str = "id, uuid, name, url, method, headers, body, interval_seconds, \
     timeout_seconds, expected_status_min, expected_status_max, enabled, owner_chat_id, \
     created_at, updated_at";

const RESULT_COLUMNS: &str =
    "target_uuid, timestamp_ms, latency_ms, status_code, failure_kind, failure_detail";

const ALERT_COLUMNS: &str = "uuid, target_uuid, kind, occurred_at, failure_kind, failure_detail, \
     status_code, latency_ms, delivery_status, attempts, last_error, delivered_at";

fn target_from_row(row: &Row) -> Result<Target> {
    let uuid_str: String = row.get(1)?;
    let headers_json: String = row.get(5)?;

    Ok(Target {
        id: Some(row.get(0)?),
        uuid: Uuid::parse_str(&uuid_str)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method: row.get(4)?,
        headers: serde_json::from_str::<BTreeMap<String, String>>(&headers_json)?,
        body: row.get(6)?,
        interval_seconds: row.get::<i64>(7)? as u64,
        timeout_seconds: row.get::<i64>(8)? as u64,
        expected_status: StatusRange::new(row.get::<i64>(9)? as u16, row.get::<i64>(10)? as u16),
        enabled: row.get::<i64>(11)? != 0,
        owner_chat_id: row.get(12)?,
        created_at: millis_to_timestamp(row.get(13)?),
        updated_at: millis_to_timestamp(row.get(14)?),
    })
}

fn result_from_row(row: &Row) -> Result<CheckResult> {
    let uuid_str: String = row.get(0)?;
    let failure_kind: Option<String> = row.get(4)?;
    let failure_detail: Option<String> = row.get(5)?;

    let failure = match failure_kind {
        Some(kind) => Some(
            FailureReason::from_parts(&kind, failure_detail)
                .ok_or_else(|| anyhow!("Unknown failure kind in database: {}", kind))?,
        ),
        None => None,
    };

    Ok(CheckResult {
        target_id: Uuid::parse_str(&uuid_str)?,
        timestamp: millis_to_timestamp(row.get(1)?),
        latency_ms: row.get::<i64>(2)? as u64,
        status_code: row.get::<Option<i64>>(3)?.map(|v| v as u16),
        failure,
    })
}

fn alert_from_row(row: &Row) -> Result<AlertEvent> {
    let uuid_str: String = row.get(0)?;
    let target_uuid_str: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let failure_kind: Option<String> = row.get(4)?;
    let failure_detail: Option<String> = row.get(5)?;
    let delivery_status: String = row.get(8)?;

    Ok(AlertEvent {
        uuid: Uuid::parse_str(&uuid_str)?,
        target_uuid: Uuid::parse_str(&target_uuid_str)?,
        kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        occurred_at: millis_to_timestamp(row.get(3)?),
        reason: failure_kind.and_then(|kind| FailureReason::from_parts(&kind, failure_detail)),
        status_code: row.get::<Option<i64>>(6)?.map(|v| v as u16),
        latency_ms: row.get::<Option<i64>>(7)?.map(|v| v as u64),
        delivery_status: delivery_status.parse().map_err(|e: String| anyhow!(e))?,
        attempts: row.get::<i64>(9)? as u32,
        last_error: row.get(10)?,
        delivered_at: row.get::<Option<i64>>(11)?.map(millis_to_timestamp),
    })
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_targets(&self, filter: &str) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {TARGET_COLUMNS} FROM targets {filter} ORDER BY id"), ())
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        self.query_targets("").await
    }

    async fn get_enabled_targets(&self) -> Result<Vec<Target>> {
        self.query_targets("WHERE enabled = 1").await
    }

    async fn get_target(&self, uuid: Uuid) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE uuid = ?"),
                params![uuid.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(target_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_target(&self, target: &Target) -> Result<i64> {
        let conn = self.get_conn().await?;
        let headers = serde_json::to_string(&target.headers)?;
        let updated_at = timestamp_to_millis(target.updated_at);

        if let Some(id) = target.id {
            conn.execute(
                "UPDATE targets SET name = ?, url = ?, method = ?, headers = ?, body = ?, interval_seconds = ?, timeout_seconds = ?, expected_status_min = ?, expected_status_max = ?, enabled = ?, owner_chat_id = ?, updated_at = ? WHERE id = ?",
                params![
                    target.name.clone(),
                    target.url.clone(),
                    target.method.clone(),
                    headers,
                    target.body.clone(),
                    target.interval_seconds as i64,
                    target.timeout_seconds as i64,
                    target.expected_status.min as i64,
                    target.expected_status.max as i64,
                    if target.enabled { 1 } else { 0 },
                    target.owner_chat_id.clone(),
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO targets (uuid, name, url, method, headers, body, interval_seconds, timeout_seconds, expected_status_min, expected_status_max, enabled, owner_chat_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    target.uuid.to_string(),
                    target.name.clone(),
                    target.url.clone(),
                    target.method.clone(),
                    headers,
                    target.body.clone(),
                    target.interval_seconds as i64,
                    target.timeout_seconds as i64,
                    target.expected_status.min as i64,
                    target.expected_status.max as i64,
                    if target.enabled { 1 } else { 0 },
                    target.owner_chat_id.clone(),
                    timestamp_to_millis(target.created_at),
                    updated_at
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn delete_target(&self, uuid: Uuid) -> Result<bool> {
        let conn = self.get_conn().await?;
        let uuid = uuid.to_string();

        // dependents first so the foreign keys hold
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM check_results WHERE target_uuid = ?", params![uuid.clone()]).await?;
        tx.execute("DELETE FROM target_states WHERE target_uuid = ?", params![uuid.clone()]).await?;
        tx.execute("DELETE FROM alert_events WHERE target_uuid = ?", params![uuid.clone()]).await?;
        let deleted = tx.execute("DELETE FROM targets WHERE uuid = ?", params![uuid]).await?;
        tx.commit().await?;

        Ok(deleted > 0)
    }

    async fn set_target_enabled(&self, uuid: Uuid, enabled: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE targets SET enabled = ?, updated_at = ? WHERE uuid = ?",
                params![
                    if enabled { 1 } else { 0 },
                    timestamp_to_millis(SystemTime::now()),
                    uuid.to_string()
                ],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_all_targets_enabled(&self, enabled: bool) -> Result<u64> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE targets SET enabled = ?1, updated_at = ?2 WHERE enabled != ?1",
                params![if enabled { 1 } else { 0 }, timestamp_to_millis(SystemTime::now())],
            )
            .await?;
        Ok(updated)
    }

    async fn save_result(&self, result: &CheckResult) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO check_results (target_uuid, timestamp_ms, latency_ms, status_code, success, failure_kind, failure_detail) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(target_uuid, timestamp_ms) DO UPDATE SET
                latency_ms = excluded.latency_ms,
                status_code = excluded.status_code,
                success = excluded.success,
                failure_kind = excluded.failure_kind,
                failure_detail = excluded.failure_detail",
            params![
                result.target_id.to_string(),
                result.timestamp_millis(),
                result.latency_ms as i64,
                result.status_code.map(|v| v as i64),
                if result.is_success() { 1 } else { 0 },
                result.failure.as_ref().map(|f| f.kind().to_string()),
                result.failure.as_ref().and_then(|f| f.detail())
            ],
        )
        .await?;

        Ok(())
    }

    async fn get_recent_results(&self, target_uuid: Uuid, limit: usize) -> Result<Vec<CheckResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM check_results WHERE target_uuid = ? ORDER BY timestamp_ms DESC LIMIT ?"
                ),
                params![target_uuid.to_string(), limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(result_from_row(&row)?);
        }
        Ok(results)
    }

    async fn count_results(&self, target_uuid: Uuid) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM check_results WHERE target_uuid = ?",
                params![target_uuid.to_string()],
            )
            .await?;

        let row = rows.next().await?.ok_or_else(|| anyhow!("COUNT returned no rows"))?;
        Ok(row.get::<i64>(0)? as u64)
    }

    async fn get_uptime_summary(&self, target_uuid: Uuid, since: SystemTime) -> Result<UptimeSummary> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(success), 0), AVG(latency_ms) FROM check_results WHERE target_uuid = ? AND timestamp_ms >= ?",
                params![target_uuid.to_string(), timestamp_to_millis(since)],
            )
            .await?;

        let row = rows.next().await?.ok_or_else(|| anyhow!("Aggregate returned no rows"))?;
        Ok(UptimeSummary {
            target_uuid,
            since,
            total_checks: row.get::<i64>(0)? as u64,
            successful_checks: row.get::<i64>(1)? as u64,
            average_latency_ms: row.get::<Option<f64>>(2)?,
        })
    }

    async fn delete_results_before(&self, cutoff: SystemTime) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM check_results WHERE timestamp_ms < ?",
                params![timestamp_to_millis(cutoff)],
            )
            .await?;
        Ok(deleted)
    }

    async fn load_target_state(&self, target_uuid: Uuid) -> Result<Option<TargetState>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT status, consecutive_failures, consecutive_successes, last_transition_at, last_result_at FROM target_states WHERE target_uuid = ?",
                params![target_uuid.to_string()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let status: String = row.get(0)?;
        Ok(Some(TargetState {
            target_uuid,
            status: status.parse().map_err(|e: String| anyhow!(e))?,
            consecutive_failures: row.get::<i64>(1)? as u32,
            consecutive_successes: row.get::<i64>(2)? as u32,
            last_transition_at: row.get::<Option<i64>>(3)?.map(millis_to_timestamp),
            last_result_at: row.get::<Option<i64>>(4)?.map(millis_to_timestamp),
        }))
    }

    async fn save_target_state(&self, state: &TargetState) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO target_states (target_uuid, status, consecutive_failures, consecutive_successes, last_transition_at, last_result_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(target_uuid) DO UPDATE SET
                status = excluded.status,
                consecutive_failures = excluded.consecutive_failures,
                consecutive_successes = excluded.consecutive_successes,
                last_transition_at = excluded.last_transition_at,
                last_result_at = excluded.last_result_at,
                updated_at = excluded.updated_at",
            params![
                state.target_uuid.to_string(),
                state.status.to_string(),
                state.consecutive_failures as i64,
                state.consecutive_successes as i64,
                state.last_transition_at.map(timestamp_to_millis),
                state.last_result_at.map(timestamp_to_millis),
                timestamp_to_millis(SystemTime::now())
            ],
        )
        .await?;

        Ok(())
    }

    async fn insert_alert_event(&self, event: &AlertEvent) -> Result<()> {
        let conn = self.get_conn().await?;

        // Re-inserting an event that already exists must not reset its delivery state
        conn.execute(
            "INSERT INTO alert_events (uuid, target_uuid, kind, occurred_at, failure_kind, failure_detail, status_code, latency_ms, delivery_status, attempts, last_error, delivered_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(uuid) DO NOTHING",
            params![
                event.uuid.to_string(),
                event.target_uuid.to_string(),
                event.kind.as_str(),
                timestamp_to_millis(event.occurred_at),
                event.reason.as_ref().map(|r| r.kind().to_string()),
                event.reason.as_ref().and_then(|r| r.detail()),
                event.status_code.map(|v| v as i64),
                event.latency_ms.map(|v| v as i64),
                event.delivery_status.as_str(),
                event.attempts as i64,
                event.last_error.clone(),
                event.delivered_at.map(timestamp_to_millis)
            ],
        )
        .await?;

        Ok(())
    }

    async fn get_alert_event(&self, uuid: Uuid) -> Result<Option<AlertEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ALERT_COLUMNS} FROM alert_events WHERE uuid = ?"),
                params![uuid.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(alert_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_pending_alert_events(&self) -> Result<Vec<AlertEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ALERT_COLUMNS} FROM alert_events WHERE delivery_status = 'pending' ORDER BY occurred_at ASC"
                ),
                (),
            )
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(alert_from_row(&row)?);
        }
        Ok(events)
    }

    async fn list_alert_events(&self, target_uuid: Uuid, limit: usize) -> Result<Vec<AlertEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ALERT_COLUMNS} FROM alert_events WHERE target_uuid = ? ORDER BY occurred_at DESC LIMIT ?"
                ),
                params![target_uuid.to_string(), limit as i64],
            )
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(alert_from_row(&row)?);
        }
        Ok(events)
    }

    async fn update_alert_delivery(
        &self,
        uuid: Uuid,
        status: DeliveryStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let delivered_at =
            (status == DeliveryStatus::Delivered).then(|| timestamp_to_millis(SystemTime::now()));

        conn.execute(
            "UPDATE alert_events SET delivery_status = ?, attempts = ?, last_error = ?, delivered_at = COALESCE(?, delivered_at) WHERE uuid = ?",
            params![
                status.as_str(),
                attempts as i64,
                last_error.map(str::to_string),
                delivered_at,
                uuid.to_string()
            ],
        )
        .await?;

        Ok(())
    }

    async fn delete_settled_alerts_before(&self, cutoff: SystemTime) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM alert_events WHERE delivery_status != 'pending' AND occurred_at < ?",
                params![timestamp_to_millis(cutoff)],
            )
            .await?;
        Ok(deleted)
    }
}
