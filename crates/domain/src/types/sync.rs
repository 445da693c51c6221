//! Sync run bookkeeping: options, windows, log rows and results

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provider::CalendarProvider;
use crate::errors::CalSyncError;
use crate::impl_status_conversions;

/// What triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    #[default]
    Manual,
    Scheduled,
}

impl_status_conversions!(SyncType {
    Full => "full",
    Manual => "manual",
    Scheduled => "scheduled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Import,
    Export,
    Bidirectional,
}

impl_status_conversions!(SyncDirection {
    Import => "import",
    Export => "export",
    Bidirectional => "bidirectional",
});

/// Final outcome stored on a sync log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncLogStatus {
    Started,
    Completed,
    Failed,
}

impl_status_conversions!(SyncLogStatus {
    Started => "started",
    Completed => "completed",
    Failed => "failed",
});

/// Position of a run in its state machine.
///
/// `Started → FetchingExternal → Diffing → Completed`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunState {
    Started,
    FetchingExternal,
    Diffing,
    Completed,
    Failed,
}

impl_status_conversions!(SyncRunState {
    Started => "started",
    FetchingExternal => "fetching_external",
    Diffing => "diffing",
    Completed => "completed",
    Failed => "failed",
});

impl SyncRunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Started, Self::FetchingExternal)
            | (Self::FetchingExternal, Self::Diffing)
            | (Self::Diffing, Self::Completed) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One error captured during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    /// Present when the error concerns a single event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    pub kind: String,
    pub message: String,
}

impl SyncErrorRecord {
    pub fn for_event(provider_event_id: impl Into<String>, error: &CalSyncError) -> Self {
        Self {
            provider_event_id: Some(provider_event_id.into()),
            kind: error.label().to_string(),
            message: error.to_string(),
        }
    }

    pub fn for_run(error: &CalSyncError) -> Self {
        Self {
            provider_event_id: None,
            kind: error.label().to_string(),
            message: error.to_string(),
        }
    }
}

/// Aggregate counters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub events_processed: u32,
    pub events_created: u32,
    pub events_updated: u32,
    pub events_deleted: u32,
}

/// One row per run in the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    pub status: SyncLogStatus,
    pub state: SyncRunState,
    pub counts: SyncCounts,
    pub errors: Vec<SyncErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl SyncLog {
    pub fn start(integration_id: Uuid, sync_type: SyncType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            integration_id,
            sync_type,
            direction: SyncDirection::Import,
            status: SyncLogStatus::Started,
            state: SyncRunState::Started,
            counts: SyncCounts::default(),
            errors: Vec::new(),
            started_at: now,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Move to `next`; returns false and leaves the row untouched when the
    /// transition is not allowed.
    pub fn advance(&mut self, next: SyncRunState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn complete(
        &mut self,
        counts: SyncCounts,
        errors: Vec<SyncErrorRecord>,
        now: DateTime<Utc>,
    ) {
        self.counts = counts;
        self.errors = errors;
        self.state = SyncRunState::Completed;
        self.status = SyncLogStatus::Completed;
        self.finish(now);
    }

    pub fn fail(&mut self, counts: SyncCounts, errors: Vec<SyncErrorRecord>, now: DateTime<Utc>) {
        self.counts = counts;
        self.errors = errors;
        self.state = SyncRunState::Failed;
        self.status = SyncLogStatus::Failed;
        self.finish(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
    }
}

/// Time range fetched from the provider in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn around(now: DateTime<Utc>, lookback_days: i64, lookahead_days: i64) -> Self {
        Self {
            start: now - Duration::days(lookback_days),
            end: now + Duration::days(lookahead_days),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Filters and overrides accepted by `sync_calendars`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub integration_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub provider: Option<CalendarProvider>,
    pub window: Option<SyncWindow>,
    #[serde(default)]
    pub sync_type: SyncType,
}

/// Outcome of one integration's pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub integration_id: Uuid,
    pub provider: CalendarProvider,
    pub success: bool,
    pub counts: SyncCounts,
    pub errors: Vec<SyncErrorRecord>,
    /// Local events in the window that the provider no longer returned.
    /// They are left in place for explicit reconciliation.
    pub unmatched_local_events: Vec<String>,
    pub sync_log_id: Option<Uuid>,
}

impl SyncResult {
    /// Result for a pass that never got far enough to write a log row.
    pub fn rejected(
        integration_id: Uuid,
        provider: CalendarProvider,
        error: &CalSyncError,
    ) -> Self {
        Self {
            integration_id,
            provider,
            success: false,
            counts: SyncCounts::default(),
            errors: vec![SyncErrorRecord::for_run(error)],
            unmatched_local_events: Vec::new(),
            sync_log_id: None,
        }
    }
}
