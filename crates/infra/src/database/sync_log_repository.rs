//! SQLite-backed implementation of the SyncLogRepository port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::SyncLogRepository;
use calsync_domain::{Result, SyncCounts, SyncLog, SyncLogStatus, SyncRunState};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::columns::{self, opt_millis, sql, to_json, to_millis};
use super::pool::{with_connection, SqlitePool};

const SELECT_COLUMNS: &str = "SELECT id, integration_id, sync_type, direction, status, state,
        events_processed, events_created, events_updated, events_deleted, errors,
        started_at, completed_at, duration_ms
     FROM sync_logs";

/// SQLite implementation of SyncLogRepository
pub struct SqliteSyncLogRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteSyncLogRepository {
    /// Create a new sync log repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

fn map_log(row: &Row<'_>) -> rusqlite::Result<SyncLog> {
    Ok(SyncLog {
        id: columns::uuid(row, 0)?,
        integration_id: columns::uuid(row, 1)?,
        sync_type: columns::parsed(row, 2)?,
        direction: columns::parsed(row, 3)?,
        status: columns::parsed(row, 4)?,
        state: columns::parsed(row, 5)?,
        counts: SyncCounts {
            events_processed: row.get(6)?,
            events_created: row.get(7)?,
            events_updated: row.get(8)?,
            events_deleted: row.get(9)?,
        },
        errors: columns::json(row, 10)?,
        started_at: columns::datetime(row, 11)?,
        completed_at: columns::opt_datetime(row, 12)?,
        duration_ms: row.get(13)?,
    })
}

#[async_trait]
impl SyncLogRepository for SqliteSyncLogRepository {
    #[instrument(skip(self, log), fields(run_id = %log.id, integration_id = %log.integration_id))]
    async fn insert(&self, log: &SyncLog) -> Result<()> {
        let log = log.clone();
        let errors = to_json(&log.errors)?;
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO sync_logs (
                    id, integration_id, sync_type, direction, status, state,
                    events_processed, events_created, events_updated, events_deleted,
                    errors, started_at, completed_at, duration_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    log.id.to_string(),
                    log.integration_id.to_string(),
                    log.sync_type.to_string(),
                    log.direction.to_string(),
                    log.status.to_string(),
                    log.state.to_string(),
                    log.counts.events_processed,
                    log.counts.events_created,
                    log.counts.events_updated,
                    log.counts.events_deleted,
                    errors,
                    to_millis(log.started_at),
                    opt_millis(log.completed_at),
                    log.duration_ms,
                ],
            )
            .map_err(sql)?;
            Ok(())
        })
        .await
    }

    async fn update_state(&self, id: Uuid, state: SyncRunState) -> Result<()> {
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "UPDATE sync_logs SET state = ?2 WHERE id = ?1 AND status = ?3",
                params![id.to_string(), state.to_string(), SyncLogStatus::Started.to_string()],
            )
            .map_err(sql)?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, log), fields(run_id = %log.id, status = %log.status))]
    async fn finalize(&self, log: &SyncLog) -> Result<()> {
        let log = log.clone();
        let errors = to_json(&log.errors)?;
        with_connection(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_logs
                     SET status = ?2, state = ?3,
                         events_processed = ?4, events_created = ?5,
                         events_updated = ?6, events_deleted = ?7,
                         errors = ?8, completed_at = ?9, duration_ms = ?10
                     WHERE id = ?1 AND status = ?11",
                    params![
                        log.id.to_string(),
                        log.status.to_string(),
                        log.state.to_string(),
                        log.counts.events_processed,
                        log.counts.events_created,
                        log.counts.events_updated,
                        log.counts.events_deleted,
                        errors,
                        opt_millis(log.completed_at),
                        log.duration_ms,
                        SyncLogStatus::Started.to_string(),
                    ],
                )
                .map_err(sql)?;
            if changed == 0 {
                debug!("sync log already finalized");
            }
            Ok(())
        })
        .await
    }

    async fn list_for_integration(
        &self,
        integration_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SyncLog>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        with_connection(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS} WHERE integration_id = ?1
                     ORDER BY started_at DESC, id DESC LIMIT ?2"
                ))
                .map_err(sql)?;
            let rows =
                stmt.query_map(params![integration_id.to_string(), limit], map_log).map_err(sql)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn fail_stale(&self, started_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "UPDATE sync_logs
                 SET status = ?3, state = ?4, completed_at = ?1,
                     duration_ms = MAX(?1 - started_at, 0)
                 WHERE status = ?5 AND started_at < ?2",
                params![
                    to_millis(now),
                    to_millis(started_before),
                    SyncLogStatus::Failed.to_string(),
                    SyncRunState::Failed.to_string(),
                    SyncLogStatus::Started.to_string(),
                ],
            )
            .map_err(sql)
        })
        .await
    }
}
