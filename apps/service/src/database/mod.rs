/// Database abstraction layer
///
/// Targets, the check result time series, evaluator state and alert events
/// all live in a single local libsql database.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::DatabaseImpl;
    use crate::pool::open_pool;

    /// Fresh, migrated database in a temporary directory.
    /// Keep the `TempDir` alive for as long as the database is used.
    pub(crate) async fn temp_database() -> (TempDir, Arc<DatabaseImpl>) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let pool = open_pool(dir.path().join("test.db"), 4).await.expect("open pool");
        {
            let conn = pool.get().await.expect("get connection");
            super::initialize_database(&conn).await.expect("run migrations");
        }
        (dir, Arc::new(DatabaseImpl::new_from_pool(pool)))
    }
}
