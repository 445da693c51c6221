//! SQLite-backed implementation of the IntegrationRepository port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::{IntegrationFilter, IntegrationRepository};
use calsync_domain::{
    CalSyncError, CalendarIntegration, CalendarProvider, EncryptedSecret, Result,
    SyncErrorRecord, TokenUpdate,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::columns::{self, opt_millis, sql, to_json, to_millis};
use super::pool::{with_connection, SqlitePool};

const SELECT_COLUMNS: &str = "SELECT id, user_id, provider, provider_account_id,
        access_token_ciphertext, access_token_iv, refresh_token_ciphertext, refresh_token_iv,
        token_expiry, scope, calendar_id, calendar_name, is_active, sync_enabled,
        last_sync_at, sync_errors, sync_in_progress, sync_started_at, created_at, updated_at
     FROM calendar_integrations";

/// SQLite implementation of IntegrationRepository
pub struct SqliteIntegrationRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteIntegrationRepository {
    /// Create a new integration repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

fn map_integration(row: &Row<'_>) -> rusqlite::Result<CalendarIntegration> {
    let refresh_token = match (row.get::<_, Option<String>>(6)?, row.get::<_, Option<String>>(7)?)
    {
        (Some(ciphertext), Some(iv)) => Some(EncryptedSecret { ciphertext, iv }),
        _ => None,
    };

    Ok(CalendarIntegration {
        id: columns::uuid(row, 0)?,
        user_id: row.get(1)?,
        provider: columns::parsed(row, 2)?,
        provider_account_id: row.get(3)?,
        access_token: EncryptedSecret { ciphertext: row.get(4)?, iv: row.get(5)? },
        refresh_token,
        token_expiry: columns::opt_datetime(row, 8)?,
        scope: row.get(9)?,
        calendar_id: row.get(10)?,
        calendar_name: row.get(11)?,
        is_active: row.get(12)?,
        sync_enabled: row.get(13)?,
        last_sync_at: columns::opt_datetime(row, 14)?,
        sync_errors: columns::opt_json(row, 15)?,
        sync_in_progress: row.get(16)?,
        sync_started_at: columns::opt_datetime(row, 17)?,
        created_at: columns::datetime(row, 18)?,
        updated_at: columns::datetime(row, 19)?,
    })
}

fn opt_errors_json(errors: Option<&Vec<SyncErrorRecord>>) -> Result<Option<String>> {
    errors.map(to_json).transpose()
}

#[async_trait]
impl IntegrationRepository for SqliteIntegrationRepository {
    #[instrument(
        skip(self, integration),
        fields(user_id = %integration.user_id, provider = %integration.provider)
    )]
    async fn upsert(&self, integration: &CalendarIntegration) -> Result<CalendarIntegration> {
        let integration = integration.clone();
        let sync_errors = opt_errors_json(integration.sync_errors.as_ref())?;

        with_connection(&self.pool, move |conn| {
            let tx = conn.transaction().map_err(sql)?;
            tx.execute(
                "INSERT INTO calendar_integrations (
                    id, user_id, provider, provider_account_id,
                    access_token_ciphertext, access_token_iv,
                    refresh_token_ciphertext, refresh_token_iv,
                    token_expiry, scope, calendar_id, calendar_name,
                    is_active, sync_enabled, last_sync_at, sync_errors,
                    sync_in_progress, sync_started_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, 0, NULL, ?17, ?18)
                ON CONFLICT(user_id, provider) DO UPDATE SET
                    provider_account_id = excluded.provider_account_id,
                    access_token_ciphertext = excluded.access_token_ciphertext,
                    access_token_iv = excluded.access_token_iv,
                    refresh_token_ciphertext = excluded.refresh_token_ciphertext,
                    refresh_token_iv = excluded.refresh_token_iv,
                    token_expiry = excluded.token_expiry,
                    scope = excluded.scope,
                    calendar_id = excluded.calendar_id,
                    calendar_name = excluded.calendar_name,
                    is_active = excluded.is_active,
                    sync_enabled = excluded.sync_enabled,
                    last_sync_at = excluded.last_sync_at,
                    sync_errors = excluded.sync_errors,
                    updated_at = excluded.updated_at",
                params![
                    integration.id.to_string(),
                    integration.user_id,
                    integration.provider.as_str(),
                    integration.provider_account_id,
                    integration.access_token.ciphertext,
                    integration.access_token.iv,
                    integration.refresh_token.as_ref().map(|t| t.ciphertext.as_str()),
                    integration.refresh_token.as_ref().map(|t| t.iv.as_str()),
                    opt_millis(integration.token_expiry),
                    integration.scope,
                    integration.calendar_id,
                    integration.calendar_name,
                    integration.is_active,
                    integration.sync_enabled,
                    opt_millis(integration.last_sync_at),
                    sync_errors,
                    to_millis(integration.created_at),
                    to_millis(integration.updated_at),
                ],
            )
            .map_err(sql)?;

            let stored = tx
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND provider = ?2"),
                    params![integration.user_id, integration.provider.as_str()],
                    map_integration,
                )
                .map_err(sql)?;
            tx.commit().map_err(sql)?;

            debug!(integration_id = %stored.id, "upserted calendar integration");
            Ok(stored)
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CalendarIntegration>> {
        with_connection(&self.pool, move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                map_integration,
            )
            .optional()
            .map_err(sql)
        })
        .await
    }

    async fn find_by_user_provider(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>> {
        let user_id = user_id.to_string();
        with_connection(&self.pool, move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND provider = ?2"),
                params![user_id, provider.as_str()],
                map_integration,
            )
            .optional()
            .map_err(sql)
        })
        .await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CalendarIntegration>> {
        let user_id = user_id.to_string();
        with_connection(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY provider ASC"))
                .map_err(sql)?;
            let rows = stmt.query_map(params![user_id], map_integration).map_err(sql)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_syncable(&self, filter: &IntegrationFilter) -> Result<Vec<CalendarIntegration>> {
        let integration_id = filter.integration_id.map(|id| id.to_string());
        let user_id = filter.user_id.clone();
        let provider = filter.provider.map(|p| p.as_str());

        with_connection(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS}
                     WHERE is_active = 1 AND sync_enabled = 1
                       AND (?1 IS NULL OR id = ?1)
                       AND (?2 IS NULL OR user_id = ?2)
                       AND (?3 IS NULL OR provider = ?3)
                     ORDER BY created_at ASC"
                ))
                .map_err(sql)?;
            let rows = stmt
                .query_map(params![integration_id, user_id, provider], map_integration)
                .map_err(sql)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql)
        })
        .await
    }

    #[instrument(skip(self, update))]
    async fn update_tokens(&self, id: Uuid, update: &TokenUpdate) -> Result<()> {
        let update = update.clone();
        with_connection(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE calendar_integrations
                     SET access_token_ciphertext = ?2, access_token_iv = ?3,
                         refresh_token_ciphertext = ?4, refresh_token_iv = ?5,
                         token_expiry = ?6, updated_at = ?7
                     WHERE id = ?1",
                    params![
                        id.to_string(),
                        update.access_token.ciphertext,
                        update.access_token.iv,
                        update.refresh_token.as_ref().map(|t| t.ciphertext.as_str()),
                        update.refresh_token.as_ref().map(|t| t.iv.as_str()),
                        opt_millis(update.token_expiry),
                        to_millis(Utc::now()),
                    ],
                )
                .map_err(sql)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("integration {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn set_sync_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "UPDATE calendar_integrations SET sync_enabled = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), enabled, to_millis(Utc::now())],
            )
            .map_err(sql)?;
            Ok(())
        })
        .await
    }

    async fn try_begin_sync(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        with_connection(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE calendar_integrations
                     SET sync_in_progress = 1, sync_started_at = ?2
                     WHERE id = ?1 AND sync_in_progress = 0",
                    params![id.to_string(), to_millis(now)],
                )
                .map_err(sql)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn finish_sync(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        completed: bool,
        errors: Option<Vec<SyncErrorRecord>>,
    ) -> Result<()> {
        let errors = opt_errors_json(errors.as_ref())?;
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "UPDATE calendar_integrations
                 SET sync_in_progress = 0,
                     sync_started_at = NULL,
                     sync_errors = ?3,
                     last_sync_at = CASE WHEN ?4 THEN ?2 ELSE last_sync_at END,
                     updated_at = ?2
                 WHERE id = ?1",
                params![id.to_string(), to_millis(finished_at), errors, completed],
            )
            .map_err(sql)?;
            Ok(())
        })
        .await
    }

    async fn release_stale_sync_flags(&self, started_before: DateTime<Utc>) -> Result<usize> {
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "UPDATE calendar_integrations
                 SET sync_in_progress = 0, sync_started_at = NULL
                 WHERE sync_in_progress = 1 AND sync_started_at < ?1",
                params![to_millis(started_before)],
            )
            .map_err(sql)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool> {
        with_connection(&self.pool, move |conn| {
            let deleted = conn
                .execute("DELETE FROM calendar_integrations WHERE id = ?1", params![id.to_string()])
                .map_err(sql)?;
            Ok(deleted > 0)
        })
        .await
    }
}
