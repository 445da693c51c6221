//! Reconciliation of a provider snapshot against the canonical store

use std::collections::{HashMap, HashSet};

use calsync_domain::{CalendarEvent, EventStatus, ExternalEvent};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Write the orchestrator must apply for one provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventChange {
    /// Event only known to the provider; stored as blocked time.
    Create(CalendarEvent),
    /// Event known on both sides; provider fields refreshed, linkage kept.
    Update(CalendarEvent),
    /// Provider reports the event cancelled and the local row is not yet.
    Cancel(CalendarEvent),
}

impl EventChange {
    pub fn event(&self) -> &CalendarEvent {
        match self {
            Self::Create(event) | Self::Update(event) | Self::Cancel(event) => event,
        }
    }

    pub fn provider_event_id(&self) -> &str {
        &self.event().provider_event_id
    }
}

/// Result of diffing one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub changes: Vec<EventChange>,
    /// Provider ids of local events in the window the provider no longer
    /// returned.
    pub unmatched_local_events: Vec<String>,
    pub events_processed: u32,
}

/// Diff `external` against the stored rows of one integration.
///
/// `existing` holds every stored row whose provider id appears in
/// `external`; `local_in_window` holds the stored rows inside the fetched
/// window. A provider id returned twice is planned once, from its last
/// snapshot.
pub fn plan_changes(
    integration_id: Uuid,
    external: &[ExternalEvent],
    existing: Vec<CalendarEvent>,
    local_in_window: &[CalendarEvent],
    now: DateTime<Utc>,
) -> SyncPlan {
    let mut stored: HashMap<String, CalendarEvent> =
        existing.into_iter().map(|event| (event.provider_event_id.clone(), event)).collect();

    let mut latest: HashMap<&str, &ExternalEvent> = HashMap::with_capacity(external.len());
    for snapshot in external {
        latest.insert(snapshot.provider_event_id.as_str(), snapshot);
    }

    let mut changes = Vec::with_capacity(latest.len());
    let mut planned: HashSet<&str> = HashSet::with_capacity(latest.len());

    for snapshot in external {
        let id = snapshot.provider_event_id.as_str();
        if !planned.insert(id) {
            continue;
        }
        let snapshot = latest.get(id).copied().unwrap_or(snapshot);

        match (stored.remove(id), snapshot.status) {
            (Some(current), EventStatus::Cancelled) if current.status == EventStatus::Cancelled => {
            }
            (Some(mut current), EventStatus::Cancelled) => {
                current.apply_external(snapshot, now);
                changes.push(EventChange::Cancel(current));
            }
            (None, EventStatus::Cancelled) => {}
            (Some(mut current), _) => {
                current.apply_external(snapshot, now);
                changes.push(EventChange::Update(current));
            }
            (None, _) => {
                changes.push(EventChange::Create(CalendarEvent::imported(
                    integration_id,
                    snapshot,
                    now,
                )));
            }
        }
    }

    let unmatched_local_events = local_in_window
        .iter()
        .filter(|event| !planned.contains(event.provider_event_id.as_str()))
        .map(|event| event.provider_event_id.clone())
        .collect();

    SyncPlan {
        changes,
        unmatched_local_events,
        events_processed: u32::try_from(external.len()).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use calsync_domain::EventTime;
    use chrono::{Duration, TimeZone};

    use super::*;

    fn snapshot(id: &str, status: EventStatus) -> ExternalEvent {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();
        ExternalEvent {
            provider_event_id: id.into(),
            title: format!("Event {id}"),
            description: None,
            start: EventTime::utc(start),
            end: EventTime::utc(start + Duration::hours(1)),
            location: None,
            attendees: Vec::new(),
            recurrence_rule: None,
            status,
            visibility: None,
        }
    }

    fn stored(integration_id: Uuid, id: &str) -> CalendarEvent {
        CalendarEvent::imported(integration_id, &snapshot(id, EventStatus::Confirmed), Utc::now())
    }

    #[test]
    fn matched_events_update_and_new_events_create() {
        let integration_id = Uuid::now_v7();
        let external = vec![
            snapshot("a", EventStatus::Confirmed),
            snapshot("b", EventStatus::Confirmed),
            snapshot("c", EventStatus::Tentative),
        ];
        let existing = vec![stored(integration_id, "b")];

        let plan = plan_changes(integration_id, &external, existing.clone(), &existing, Utc::now());

        assert_eq!(plan.events_processed, 3);
        let creates = plan.changes.iter().filter(|c| matches!(c, EventChange::Create(_))).count();
        let updates = plan.changes.iter().filter(|c| matches!(c, EventChange::Update(_))).count();
        assert_eq!((creates, updates), (2, 1));
        assert!(plan.unmatched_local_events.is_empty());
    }

    #[test]
    fn imported_events_are_blocked_time() {
        let integration_id = Uuid::now_v7();
        let plan = plan_changes(
            integration_id,
            &[snapshot("new", EventStatus::Confirmed)],
            Vec::new(),
            &[],
            Utc::now(),
        );

        let EventChange::Create(event) = &plan.changes[0] else {
            panic!("expected a create, got {:?}", plan.changes[0]);
        };
        assert!(event.is_blocked);
        assert!(!event.is_coaching_session);
        assert_eq!(event.integration_id, integration_id);
    }

    #[test]
    fn updates_keep_session_linkage() {
        let integration_id = Uuid::now_v7();
        let mut linked = stored(integration_id, "s1");
        linked.is_coaching_session = true;
        linked.is_blocked = false;
        linked.session_id = Some("session-1".into());

        let mut changed = snapshot("s1", EventStatus::Confirmed);
        changed.title = "Renamed upstream".into();

        let plan = plan_changes(integration_id, &[changed], vec![linked], &[], Utc::now());

        let EventChange::Update(event) = &plan.changes[0] else {
            panic!("expected an update");
        };
        assert_eq!(event.title, "Renamed upstream");
        assert_eq!(event.session_id.as_deref(), Some("session-1"));
        assert!(event.is_coaching_session);
        assert!(!event.is_blocked);
    }

    #[test]
    fn cancellations_touch_only_known_live_rows() {
        let integration_id = Uuid::now_v7();
        let mut already = stored(integration_id, "gone");
        already.status = EventStatus::Cancelled;
        let existing = vec![stored(integration_id, "live"), already];

        let external = vec![
            snapshot("live", EventStatus::Cancelled),
            snapshot("gone", EventStatus::Cancelled),
            snapshot("unknown", EventStatus::Cancelled),
        ];
        let plan = plan_changes(integration_id, &external, existing, &[], Utc::now());

        assert_eq!(plan.changes.len(), 1);
        assert!(matches!(&plan.changes[0], EventChange::Cancel(_)));
        assert_eq!(plan.changes[0].provider_event_id(), "live");
        assert_eq!(plan.events_processed, 3);
    }

    #[test]
    fn local_only_events_are_reported_not_removed() {
        let integration_id = Uuid::now_v7();
        let local = vec![stored(integration_id, "kept"), stored(integration_id, "orphan")];

        let plan = plan_changes(
            integration_id,
            &[snapshot("kept", EventStatus::Confirmed)],
            vec![local[0].clone()],
            &local,
            Utc::now(),
        );

        assert_eq!(plan.unmatched_local_events, vec!["orphan".to_string()]);
        assert_eq!(plan.changes.len(), 1);
    }

    #[test]
    fn repeated_provider_ids_are_planned_once_from_the_last_snapshot() {
        let integration_id = Uuid::now_v7();
        let first = snapshot("dup", EventStatus::Confirmed);
        let mut second = snapshot("dup", EventStatus::Confirmed);
        second.title = "Second copy".into();

        let plan = plan_changes(integration_id, &[first, second], Vec::new(), &[], Utc::now());

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].event().title, "Second copy");
        assert_eq!(plan.events_processed, 2);
    }
}
