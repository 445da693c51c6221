//! Canonical calendar events and the provider-facing event shapes

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CalSyncError, Result};
use crate::impl_status_conversions;

/// Start or end boundary of an event.
///
/// All-day boundaries are plain dates with no timezone and no time of day.
/// Timed boundaries are UTC instants tagged with the timezone the provider
/// reported for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTime {
    AllDay { date: NaiveDate },
    Timed { at: DateTime<Utc>, timezone: String },
}

impl EventTime {
    pub fn all_day(date: NaiveDate) -> Self {
        Self::AllDay { date }
    }

    pub fn timed(at: DateTime<Utc>, timezone: impl Into<String>) -> Self {
        Self::Timed { at, timezone: timezone.into() }
    }

    /// Timed boundary in UTC.
    pub fn utc(at: DateTime<Utc>) -> Self {
        Self::timed(at, "UTC")
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay { .. })
    }

    pub fn timezone(&self) -> Option<&str> {
        match self {
            Self::AllDay { .. } => None,
            Self::Timed { timezone, .. } => Some(timezone),
        }
    }

    /// Instant used for ordering and window queries; all-day dates map to
    /// midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            Self::AllDay { date } => date.and_time(NaiveTime::MIN).and_utc(),
            Self::Timed { at, .. } => *at,
        }
    }
}

/// Event status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl_status_conversions!(EventStatus {
    Confirmed => "confirmed",
    Tentative => "tentative",
    Cancelled => "cancelled",
});

/// Visibility flag, when the provider exposes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventVisibility {
    Default,
    Public,
    Private,
    Confidential,
}

impl_status_conversions!(EventVisibility {
    Default => "default",
    Public => "public",
    Private => "private",
    Confidential => "confidential",
});

/// Participation status of an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeStatus {
    Accepted,
    Declined,
    Tentative,
    NeedsAction,
}

impl_status_conversions!(AttendeeStatus {
    Accepted => "accepted",
    Declined => "declined",
    Tentative => "tentative",
    NeedsAction => "needs_action",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendeeStatus>,
}

/// Local bookkeeping state of a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSyncStatus {
    Synced,
    Pending,
    Error,
}

impl_status_conversions!(EventSyncStatus {
    Synced => "synced",
    Pending => "pending",
    Error => "error",
});

/// Event snapshot returned by a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub provider_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub location: Option<String>,
    pub attendees: Vec<Attendee>,
    /// Single RRULE string carried by the series master.
    pub recurrence_rule: Option<String>,
    pub status: EventStatus,
    pub visibility: Option<EventVisibility>,
}

impl ExternalEvent {
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }
}

/// Payload for creating or updating an event on a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEventData {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default = "default_event_status")]
    pub status: EventStatus,
    #[serde(default)]
    pub visibility: Option<EventVisibility>,
}

fn default_event_status() -> EventStatus {
    EventStatus::Confirmed
}

impl NewEventData {
    /// Reject payloads no provider would accept.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(CalSyncError::InvalidInput("event title must not be empty".into()));
        }
        if self.start.is_all_day() != self.end.is_all_day() {
            return Err(CalSyncError::InvalidInput(
                "start and end must both be all-day or both be timed".into(),
            ));
        }
        if self.end.to_utc() < self.start.to_utc() {
            return Err(CalSyncError::InvalidInput("event ends before it starts".into()));
        }
        Ok(())
    }
}

/// Event persisted in the canonical store, owned by one integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub provider_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub location: Option<String>,
    pub attendees: Vec<Attendee>,
    pub recurrence_rule: Option<String>,
    pub status: EventStatus,
    pub visibility: Option<EventVisibility>,
    pub is_coaching_session: bool,
    pub is_blocked: bool,
    pub session_id: Option<String>,
    pub last_sync_at: DateTime<Utc>,
    pub sync_status: EventSyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    /// New local row for an event that so far only exists on the provider.
    ///
    /// Imported events block time but are not linked to a session.
    pub fn imported(integration_id: Uuid, external: &ExternalEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            integration_id,
            provider_event_id: external.provider_event_id.clone(),
            title: external.title.clone(),
            description: external.description.clone(),
            start: external.start.clone(),
            end: external.end.clone(),
            location: external.location.clone(),
            attendees: external.attendees.clone(),
            recurrence_rule: external.recurrence_rule.clone(),
            status: external.status,
            visibility: external.visibility,
            is_coaching_session: false,
            is_blocked: true,
            session_id: None,
            last_sync_at: now,
            sync_status: EventSyncStatus::Synced,
            created_at: now,
            updated_at: now,
        }
    }

    /// Local row for a coaching session that was just created on the
    /// provider.
    pub fn coaching_session(
        integration_id: Uuid,
        session_id: impl Into<String>,
        created: &ExternalEvent,
        now: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::imported(integration_id, created, now);
        event.is_coaching_session = true;
        event.is_blocked = false;
        event.session_id = Some(session_id.into());
        event
    }

    /// Overwrite provider-owned fields from a fresh snapshot.
    ///
    /// `session_id`, `is_coaching_session` and `is_blocked` are local
    /// linkage and stay untouched.
    pub fn apply_external(&mut self, external: &ExternalEvent, now: DateTime<Utc>) {
        self.title = external.title.clone();
        self.description = external.description.clone();
        self.start = external.start.clone();
        self.end = external.end.clone();
        self.location = external.location.clone();
        self.attendees = external.attendees.clone();
        self.recurrence_rule = external.recurrence_rule.clone();
        self.status = external.status;
        self.visibility = external.visibility;
        self.last_sync_at = now;
        self.sync_status = EventSyncStatus::Synced;
        self.updated_at = now;
    }

    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.start.timezone()
    }
}

/// Calendar listed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMetadata {
    pub id: String,
    pub name: String,
    pub timezone: Option<String>,
    pub is_primary: bool,
    pub access_role: String,
    /// Account that owns the calendar, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}
