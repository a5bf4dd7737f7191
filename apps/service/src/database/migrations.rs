use anyhow::Result;
use libsql::Connection;

use super::models::timestamp_to_millis;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Targets and check result series").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Target state and alert events").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = timestamp_to_millis(std::time::SystemTime::now());

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: targets and the append-only result series.
/// `(target_uuid, timestamp_ms)` is the natural key of a result, which makes
/// replays of the same result collapse into a single row.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT,
            url TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'GET',
            headers TEXT NOT NULL DEFAULT '{}',
            body TEXT,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            timeout_seconds INTEGER NOT NULL DEFAULT 10,
            expected_status_min INTEGER NOT NULL DEFAULT 200,
            expected_status_max INTEGER NOT NULL DEFAULT 399,
            enabled INTEGER NOT NULL DEFAULT 1,
            owner_chat_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_results (
            target_uuid TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            status_code INTEGER,
            success INTEGER NOT NULL,
            failure_kind TEXT,
            failure_detail TEXT,
            PRIMARY KEY (target_uuid, timestamp_ms),
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_enabled ON targets(enabled)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_results_timestamp ON check_results(timestamp_ms)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: evaluator state and alert events
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS target_states (
            target_uuid TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'unknown',
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            consecutive_successes INTEGER NOT NULL DEFAULT 0,
            last_transition_at INTEGER,
            last_result_at INTEGER,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alert_events (
            uuid TEXT PRIMARY KEY,
            target_uuid TEXT NOT NULL,
            kind TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            failure_kind TEXT,
            failure_detail TEXT,
            status_code INTEGER,
            latency_ms INTEGER,
            delivery_status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            delivered_at INTEGER,
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alert_events_delivery ON alert_events(delivery_status)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alert_events_target ON alert_events(target_uuid, occurred_at DESC)",
        (),
    )
    .await?;

    Ok(())
}
