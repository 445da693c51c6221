//! SQLite-backed implementation of the CalendarEventRepository port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::CalendarEventRepository;
use calsync_domain::{CalendarEvent, EventTime, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::columns::{self, sql, to_json, to_millis};
use super::pool::{with_connection, SqliteConnection, SqlitePool};

const SELECT_COLUMNS: &str = "SELECT id, integration_id, provider_event_id, title, description,
        start_at, end_at, start_date, end_date, start_timezone, end_timezone, is_all_day,
        location, attendees, recurrence_rule, status, visibility,
        is_coaching_session, is_blocked, session_id,
        last_sync_at, sync_status, created_at, updated_at
     FROM calendar_events";

const INSERT_EVENT: &str = "INSERT INTO calendar_events (
        id, integration_id, provider_event_id, title, description,
        start_at, end_at, start_date, end_date, start_timezone, end_timezone, is_all_day,
        location, attendees, recurrence_rule, status, visibility,
        is_coaching_session, is_blocked, session_id,
        last_sync_at, sync_status, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
              ?18, ?19, ?20, ?21, ?22, ?23, ?24)
    ON CONFLICT(integration_id, provider_event_id) DO UPDATE SET
        title = excluded.title,
        description = excluded.description,
        start_at = excluded.start_at,
        end_at = excluded.end_at,
        start_date = excluded.start_date,
        end_date = excluded.end_date,
        start_timezone = excluded.start_timezone,
        end_timezone = excluded.end_timezone,
        is_all_day = excluded.is_all_day,
        location = excluded.location,
        attendees = excluded.attendees,
        recurrence_rule = excluded.recurrence_rule,
        status = excluded.status,
        visibility = excluded.visibility,
        last_sync_at = excluded.last_sync_at,
        sync_status = excluded.sync_status,
        updated_at = excluded.updated_at";

const LINKAGE_UPDATE: &str = ",
        is_coaching_session = excluded.is_coaching_session,
        is_blocked = excluded.is_blocked,
        session_id = excluded.session_id";

/// Upper bound on bound parameters per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

/// SQLite implementation of CalendarEventRepository
pub struct SqliteCalendarEventRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteCalendarEventRepository {
    /// Create a new calendar event repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

/// Storage form of one event boundary: the UTC instant used for window
/// queries, the calendar date for all-day boundaries and the timezone for
/// timed ones.
fn time_columns(time: &EventTime) -> (i64, Option<String>, Option<String>) {
    match time {
        EventTime::AllDay { date } => {
            (to_millis(time.to_utc()), Some(date.format("%Y-%m-%d").to_string()), None)
        }
        EventTime::Timed { at, timezone } => (to_millis(*at), None, Some(timezone.clone())),
    }
}

fn event_time(
    row: &Row<'_>,
    at_idx: usize,
    date_idx: usize,
    tz_idx: usize,
) -> rusqlite::Result<EventTime> {
    if let Some(date) = row.get::<_, Option<String>>(date_idx)? {
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(date_idx, Type::Text, Box::new(e))
        })?;
        return Ok(EventTime::all_day(date));
    }

    let at = columns::datetime(row, at_idx)?;
    let timezone = row.get::<_, Option<String>>(tz_idx)?.unwrap_or_else(|| "UTC".to_string());
    Ok(EventTime::timed(at, timezone))
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    Ok(CalendarEvent {
        id: columns::uuid(row, 0)?,
        integration_id: columns::uuid(row, 1)?,
        provider_event_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        start: event_time(row, 5, 7, 9)?,
        end: event_time(row, 6, 8, 10)?,
        location: row.get(12)?,
        attendees: columns::json(row, 13)?,
        recurrence_rule: row.get(14)?,
        status: columns::parsed(row, 15)?,
        visibility: columns::opt_parsed(row, 16)?,
        is_coaching_session: row.get(17)?,
        is_blocked: row.get(18)?,
        session_id: row.get(19)?,
        last_sync_at: columns::datetime(row, 20)?,
        sync_status: columns::parsed(row, 21)?,
        created_at: columns::datetime(row, 22)?,
        updated_at: columns::datetime(row, 23)?,
    })
}

fn write_event(conn: &SqliteConnection, event: &CalendarEvent, with_linkage: bool) -> Result<()> {
    let (start_at, start_date, start_timezone) = time_columns(&event.start);
    let (end_at, end_date, end_timezone) = time_columns(&event.end);
    let attendees = to_json(&event.attendees)?;

    let statement = if with_linkage {
        format!("{INSERT_EVENT}{LINKAGE_UPDATE}")
    } else {
        INSERT_EVENT.to_string()
    };

    conn.execute(
        &statement,
        params![
            event.id.to_string(),
            event.integration_id.to_string(),
            event.provider_event_id,
            event.title,
            event.description,
            start_at,
            end_at,
            start_date,
            end_date,
            start_timezone,
            end_timezone,
            event.is_all_day(),
            event.location,
            attendees,
            event.recurrence_rule,
            event.status.to_string(),
            event.visibility.map(|v| v.to_string()),
            event.is_coaching_session,
            event.is_blocked,
            event.session_id,
            to_millis(event.last_sync_at),
            event.sync_status.to_string(),
            to_millis(event.created_at),
            to_millis(event.updated_at),
        ],
    )
    .map_err(sql)?;
    Ok(())
}

#[async_trait]
impl CalendarEventRepository for SqliteCalendarEventRepository {
    async fn find_by_provider_event_id(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<CalendarEvent>> {
        let provider_event_id = provider_event_id.to_string();
        with_connection(&self.pool, move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE integration_id = ?1 AND provider_event_id = ?2"),
                params![integration_id.to_string(), provider_event_id],
                map_event,
            )
            .optional()
            .map_err(sql)
        })
        .await
    }

    #[instrument(skip(self, provider_event_ids), fields(ids = provider_event_ids.len()))]
    async fn find_by_provider_event_ids(
        &self,
        integration_id: Uuid,
        provider_event_ids: &[String],
    ) -> Result<Vec<CalendarEvent>> {
        if provider_event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = provider_event_ids.to_vec();

        with_connection(&self.pool, move |conn| {
            let mut found = Vec::new();
            for chunk in ids.chunks(LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn
                    .prepare(&format!(
                        "{SELECT_COLUMNS}
                         WHERE integration_id = ? AND provider_event_id IN ({placeholders})"
                    ))
                    .map_err(sql)?;

                let bound =
                    std::iter::once(integration_id.to_string()).chain(chunk.iter().cloned());
                let rows = stmt.query_map(params_from_iter(bound), map_event).map_err(sql)?;
                for row in rows {
                    found.push(row.map_err(sql)?);
                }
            }
            debug!(found = found.len(), "loaded stored events for provider ids");
            Ok(found)
        })
        .await
    }

    async fn list_in_window(
        &self,
        integration_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        with_connection(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS}
                     WHERE integration_id = ?1 AND start_at >= ?2 AND start_at < ?3
                     ORDER BY start_at ASC"
                ))
                .map_err(sql)?;
            let rows = stmt
                .query_map(
                    params![integration_id.to_string(), to_millis(start), to_millis(end)],
                    map_event,
                )
                .map_err(sql)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql)
        })
        .await
    }

    #[instrument(skip(self, event), fields(provider_event_id = %event.provider_event_id))]
    async fn upsert_from_provider(&self, event: &CalendarEvent) -> Result<()> {
        let event = event.clone();
        with_connection(&self.pool, move |conn| write_event(conn, &event, false)).await
    }

    #[instrument(skip(self, event), fields(provider_event_id = %event.provider_event_id))]
    async fn save_linked(&self, event: &CalendarEvent) -> Result<()> {
        let event = event.clone();
        with_connection(&self.pool, move |conn| write_event(conn, &event, true)).await
    }

    async fn delete(&self, integration_id: Uuid, provider_event_id: &str) -> Result<bool> {
        let provider_event_id = provider_event_id.to_string();
        with_connection(&self.pool, move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM calendar_events
                     WHERE integration_id = ?1 AND provider_event_id = ?2",
                    params![integration_id.to_string(), provider_event_id],
                )
                .map_err(sql)?;
            Ok(deleted > 0)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_by_integration(&self, integration_id: Uuid) -> Result<usize> {
        with_connection(&self.pool, move |conn| {
            conn.execute(
                "DELETE FROM calendar_events WHERE integration_id = ?1",
                params![integration_id.to_string()],
            )
            .map_err(sql)
        })
        .await
    }
}
