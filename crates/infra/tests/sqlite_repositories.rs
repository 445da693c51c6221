//! SQLite repositories against a real database file.

use std::sync::Arc;

use calsync_core::{
    CalendarEventRepository, IntegrationFilter, IntegrationRepository, SyncLogRepository,
};
use calsync_domain::{
    Attendee, AttendeeStatus, CalendarEvent, CalendarIntegration, CalendarProvider,
    EncryptedSecret, EventStatus, EventTime, ExternalEvent, SyncCounts, SyncErrorRecord,
    SyncLog, SyncLogStatus, SyncRunState, SyncType, TokenUpdate,
};
use calsync_infra::database::{
    DbManager, SqliteCalendarEventRepository, SqliteIntegrationRepository,
    SqliteSyncLogRepository,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    _dir: TempDir,
    integrations: SqliteIntegrationRepository,
    events: SqliteCalendarEventRepository,
    logs: SqliteSyncLogRepository,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let manager = DbManager::new(dir.path().join("calsync.db"), 4).expect("manager");
    manager.run_migrations().expect("migrations");
    let pool = Arc::clone(manager.pool());

    Fixture {
        _dir: dir,
        integrations: SqliteIntegrationRepository::new(Arc::clone(&pool)),
        events: SqliteCalendarEventRepository::new(Arc::clone(&pool)),
        logs: SqliteSyncLogRepository::new(pool),
    }
}

/// Millisecond-aligned instant so values survive the storage round trip.
fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap()
}

fn secret(tag: &str) -> EncryptedSecret {
    EncryptedSecret { ciphertext: format!("{tag}-ct"), iv: format!("{tag}-iv") }
}

fn integration(
    user_id: &str,
    provider: CalendarProvider,
    calendar_id: &str,
) -> CalendarIntegration {
    CalendarIntegration {
        id: Uuid::now_v7(),
        user_id: user_id.into(),
        provider,
        provider_account_id: format!("{user_id}@example.com"),
        access_token: secret("access"),
        refresh_token: Some(secret("refresh")),
        token_expiry: Some(at(12)),
        scope: Some("calendar".into()),
        calendar_id: calendar_id.into(),
        calendar_name: "Work".into(),
        is_active: true,
        sync_enabled: true,
        last_sync_at: None,
        sync_errors: None,
        sync_in_progress: false,
        sync_started_at: None,
        created_at: at(8),
        updated_at: at(8),
    }
}

fn external(id: &str, start: EventTime, end: EventTime) -> ExternalEvent {
    ExternalEvent {
        provider_event_id: id.into(),
        title: format!("Event {id}"),
        description: Some("Agenda".into()),
        start,
        end,
        location: None,
        attendees: vec![Attendee {
            email: "client@example.com".into(),
            name: Some("Client".into()),
            status: Some(AttendeeStatus::Accepted),
        }],
        recurrence_rule: None,
        status: EventStatus::Confirmed,
        visibility: None,
    }
}

fn timed(id: &str, hour: u32) -> ExternalEvent {
    external(
        id,
        EventTime::timed(at(hour), "Europe/Berlin"),
        EventTime::timed(at(hour + 1), "Europe/Berlin"),
    )
}

#[tokio::test]
async fn upsert_overwrites_the_row_for_user_and_provider() {
    let fx = fixture();
    let first = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();

    let mut second = integration("user-1", CalendarProvider::Google, "cal2");
    second.access_token = secret("rotated");
    let stored = fx.integrations.upsert(&second).await.unwrap();

    assert_eq!(stored.id, first.id);
    assert_eq!(stored.calendar_id, "cal2");
    assert_eq!(stored.access_token, secret("rotated"));
    assert_eq!(fx.integrations.list_by_user("user-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn integration_round_trips_every_column() {
    let fx = fixture();
    let mut row = integration("user-1", CalendarProvider::Microsoft, "AAMk");
    row.sync_errors = Some(vec![SyncErrorRecord {
        provider_event_id: None,
        kind: "auth".into(),
        message: "x".into(),
    }]);
    row.last_sync_at = Some(at(9));

    fx.integrations.upsert(&row).await.unwrap();
    let loaded = fx.integrations.find_by_id(row.id).await.unwrap().unwrap();

    assert_eq!(loaded, row);
}

#[tokio::test]
async fn list_syncable_applies_filters_and_skips_disabled_rows() {
    let fx = fixture();
    let google = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "g"))
        .await
        .unwrap();
    let apple = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Apple, "a"))
        .await
        .unwrap();
    let other = fx
        .integrations
        .upsert(&integration("user-2", CalendarProvider::Google, "g2"))
        .await
        .unwrap();
    fx.integrations.set_sync_enabled(other.id, false).await.unwrap();

    let all = fx.integrations.list_syncable(&IntegrationFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let filter =
        IntegrationFilter {
            provider: Some(CalendarProvider::Apple),
            ..IntegrationFilter::default()
        };
    let only_apple = fx.integrations.list_syncable(&filter).await.unwrap();
    assert_eq!(only_apple.iter().map(|i| i.id).collect::<Vec<_>>(), vec![apple.id]);

    let filter =
        IntegrationFilter { integration_id: Some(google.id), ..IntegrationFilter::default() };
    assert_eq!(fx.integrations.list_syncable(&filter).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sync_flag_admits_one_run_until_finished() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();

    assert!(fx.integrations.try_begin_sync(row.id, at(10)).await.unwrap());
    assert!(!fx.integrations.try_begin_sync(row.id, at(10)).await.unwrap());

    fx.integrations.finish_sync(row.id, at(11), true, None).await.unwrap();
    let finished = fx.integrations.find_by_id(row.id).await.unwrap().unwrap();
    assert!(!finished.sync_in_progress);
    assert_eq!(finished.last_sync_at, Some(at(11)));

    assert!(fx.integrations.try_begin_sync(row.id, at(12)).await.unwrap());
    let errors = vec![SyncErrorRecord {
        provider_event_id: Some("evt".into()),
        kind: "provider_api".into(),
        message: "HTTP 400".into(),
    }];
    fx.integrations.finish_sync(row.id, at(13), false, Some(errors.clone())).await.unwrap();

    let failed = fx.integrations.find_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(failed.last_sync_at, Some(at(11)));
    assert_eq!(failed.sync_errors, Some(errors));
}

#[tokio::test]
async fn stale_flags_are_released() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();
    fx.integrations.try_begin_sync(row.id, at(1)).await.unwrap();

    assert_eq!(fx.integrations.release_stale_sync_flags(at(0)).await.unwrap(), 0);
    assert_eq!(fx.integrations.release_stale_sync_flags(at(2)).await.unwrap(), 1);
    assert!(fx.integrations.try_begin_sync(row.id, at(3)).await.unwrap());
}

#[tokio::test]
async fn token_update_replaces_material_in_one_write() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();

    let update = TokenUpdate {
        access_token: secret("fresh"),
        refresh_token: None,
        token_expiry: Some(at(20)),
    };
    fx.integrations.update_tokens(row.id, &update).await.unwrap();

    let loaded = fx.integrations.find_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(loaded.access_token, secret("fresh"));
    assert_eq!(loaded.refresh_token, None);
    assert_eq!(loaded.token_expiry, Some(at(20)));

    let missing = fx.integrations.update_tokens(Uuid::now_v7(), &update).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn provider_upsert_is_idempotent_and_keeps_linkage() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();

    let linked = CalendarEvent::coaching_session(row.id, "session-7", &timed("evt-1", 9), at(8));
    fx.events.save_linked(&linked).await.unwrap();

    let mut moved = timed("evt-1", 10);
    moved.title = "Moved upstream".into();
    let imported = CalendarEvent::imported(row.id, &moved, at(9));
    fx.events.upsert_from_provider(&imported).await.unwrap();
    fx.events.upsert_from_provider(&imported).await.unwrap();

    let stored = fx.events.list_in_window(row.id, at(0), at(23)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, linked.id);
    assert_eq!(stored[0].title, "Moved upstream");
    assert_eq!(stored[0].start, EventTime::timed(at(10), "Europe/Berlin"));
    assert_eq!(stored[0].session_id.as_deref(), Some("session-7"));
    assert!(stored[0].is_coaching_session);
    assert!(!stored[0].is_blocked);
    assert_eq!(stored[0].attendees.len(), 1);
}

#[tokio::test]
async fn all_day_events_keep_date_only_boundaries() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Apple, "home"))
        .await
        .unwrap();

    let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
    let holiday = external(
        "holiday",
        EventTime::all_day(day),
        EventTime::all_day(day.succ_opt().unwrap()),
    );
    let imported = CalendarEvent::imported(row.id, &holiday, at(8));
    fx.events.upsert_from_provider(&imported).await.unwrap();

    let stored = fx.events.find_by_provider_event_id(row.id, "holiday").await.unwrap().unwrap();
    assert!(stored.is_all_day());
    assert_eq!(stored.start, EventTime::all_day(day));
    assert_eq!(stored.timezone(), None);
}

#[tokio::test]
async fn lookups_by_provider_ids_and_window() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();
    for (id, hour) in [("a", 9), ("b", 11), ("c", 15)] {
        let event = CalendarEvent::imported(row.id, &timed(id, hour), at(8));
        fx.events.upsert_from_provider(&event).await.unwrap();
    }

    let ids = vec!["a".to_string(), "c".to_string(), "missing".to_string()];
    let mut found: Vec<_> = fx
        .events
        .find_by_provider_event_ids(row.id, &ids)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.provider_event_id)
        .collect();
    found.sort();
    assert_eq!(found, vec!["a", "c"]);

    let window = fx.events.list_in_window(row.id, at(9), at(15)).await.unwrap();
    let ids: Vec<_> = window.iter().map(|e| e.provider_event_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(fx.events.delete(row.id, "b").await.unwrap());
    assert!(!fx.events.delete(row.id, "b").await.unwrap());
    assert_eq!(fx.events.delete_by_integration(row.id).await.unwrap(), 2);
}

#[tokio::test]
async fn deleting_an_integration_cascades() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();
    fx.events
        .upsert_from_provider(&CalendarEvent::imported(row.id, &timed("a", 9), at(8)))
        .await
        .unwrap();
    fx.logs.insert(&SyncLog::start(row.id, SyncType::Manual, at(9))).await.unwrap();

    assert!(fx.integrations.delete(row.id).await.unwrap());

    assert!(fx.events.list_in_window(row.id, at(0), at(23)).await.unwrap().is_empty());
    assert!(fx.logs.list_for_integration(row.id, 10).await.unwrap().is_empty());
    assert!(!fx.integrations.delete(row.id).await.unwrap());
}

#[tokio::test]
async fn sync_log_lifecycle() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();

    let mut log = SyncLog::start(row.id, SyncType::Scheduled, at(9));
    fx.logs.insert(&log).await.unwrap();
    fx.logs.update_state(log.id, SyncRunState::FetchingExternal).await.unwrap();

    let counts =
        SyncCounts { events_processed: 3, events_created: 2, events_updated: 1, events_deleted: 0 };
    log.advance(SyncRunState::FetchingExternal);
    log.advance(SyncRunState::Diffing);
    log.complete(counts, Vec::new(), at(9) + Duration::seconds(2));
    fx.logs.finalize(&log).await.unwrap();

    let mut late = log.clone();
    late.fail(SyncCounts::default(), Vec::new(), at(10));
    fx.logs.finalize(&late).await.unwrap();

    let history = fx.logs.list_for_integration(row.id, 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SyncLogStatus::Completed);
    assert_eq!(history[0].counts, counts);
    assert_eq!(history[0].duration_ms, Some(2000));
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();
    for hour in [9, 11, 10] {
        fx.logs.insert(&SyncLog::start(row.id, SyncType::Manual, at(hour))).await.unwrap();
    }

    let history = fx.logs.list_for_integration(row.id, 2).await.unwrap();
    let starts: Vec<_> = history.iter().map(|l| l.started_at).collect();
    assert_eq!(starts, vec![at(11), at(10)]);
}

#[tokio::test]
async fn stale_runs_are_failed() {
    let fx = fixture();
    let row = fx
        .integrations
        .upsert(&integration("user-1", CalendarProvider::Google, "cal1"))
        .await
        .unwrap();
    let stale = SyncLog::start(row.id, SyncType::Manual, at(1));
    let fresh = SyncLog::start(row.id, SyncType::Manual, at(5));
    fx.logs.insert(&stale).await.unwrap();
    fx.logs.insert(&fresh).await.unwrap();

    assert_eq!(fx.logs.fail_stale(at(3), at(6)).await.unwrap(), 1);

    let history = fx.logs.list_for_integration(row.id, 10).await.unwrap();
    let failed = history.iter().find(|l| l.id == stale.id).unwrap();
    assert_eq!(failed.status, SyncLogStatus::Failed);
    assert_eq!(failed.state, SyncRunState::Failed);
    assert_eq!(failed.duration_ms, Some(5 * 3600 * 1000));
    let untouched = history.iter().find(|l| l.id == fresh.id).unwrap();
    assert_eq!(untouched.status, SyncLogStatus::Started);
}
