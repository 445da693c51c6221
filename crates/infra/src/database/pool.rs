//! SQLite connection pool
//!
//! r2d2 pool over `rusqlite` connections. Every connection runs in WAL mode
//! with foreign keys enforced so deleting an integration cascades to its
//! events and sync logs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use calsync_domain::{CalSyncError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{info, instrument};

use crate::errors::InfraError;

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Open (or create) the database at `path` behind a pool of `max_size`
/// connections.
#[instrument(skip(path), fields(db_path = %path.display()))]
pub fn create_pool(path: &Path, max_size: u32) -> Result<Arc<SqlitePool>> {
    let manager = SqliteConnectionManager::file(path).with_init(apply_connection_pragmas);

    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(CONNECTION_TIMEOUT)
        .build(manager)
        .map_err(InfraError::from)?;

    info!(max_size = pool.max_size(), "sqlite pool initialised");
    Ok(Arc::new(pool))
}

fn apply_connection_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Run blocking database work on the blocking thread pool.
///
/// The closure receives a pooled connection; errors it returns pass through
/// unchanged.
pub async fn with_connection<T, F>(pool: &Arc<SqlitePool>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
{
    let pool = Arc::clone(pool);
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(InfraError::from)?;
        work(&mut conn)
    })
    .await
    .map_err(|e| CalSyncError::Internal(format!("spawn_blocking failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn connections_enforce_foreign_keys_and_wal() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("test.db"), 2).unwrap();

        let conn = pool.get().unwrap();
        let foreign_keys: i64 =
            conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        let journal: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();

        assert_eq!(foreign_keys, 1);
        assert_eq!(journal.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn with_connection_runs_off_the_async_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("test.db"), 2).unwrap();

        let answer = with_connection(&pool, |conn| {
            conn.query_row("SELECT 40 + 2", [], |row| row.get::<_, i64>(0))
                .map_err(|e| CalSyncError::from(InfraError::from(e)))
        })
        .await
        .unwrap();

        assert_eq!(answer, 42);
    }
}
