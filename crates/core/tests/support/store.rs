use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::{
    CalendarEventRepository, IntegrationFilter, IntegrationRepository, SyncLogRepository,
};
use calsync_domain::{
    CalSyncError, CalendarEvent, CalendarIntegration, CalendarProvider, Result, SyncErrorRecord,
    SyncLog, SyncLogStatus, SyncRunState, TokenUpdate,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything the in-memory repositories hold, plus failure switches.
#[derive(Default)]
pub struct StoreState {
    pub integrations: Vec<CalendarIntegration>,
    pub events: Vec<CalendarEvent>,
    pub logs: Vec<SyncLog>,
    /// Provider event ids whose upsert fails with a database error.
    pub failing_event_ids: HashSet<String>,
    pub fail_save_linked: bool,
    pub token_updates: usize,
}

/// In-memory stand-in for the SQLite store.
///
/// The three repository handles share one state so deletes cascade the way
/// foreign keys do.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrations(&self) -> Arc<InMemoryIntegrations> {
        Arc::new(InMemoryIntegrations { state: self.state.clone() })
    }

    pub fn events(&self) -> Arc<InMemoryEvents> {
        Arc::new(InMemoryEvents { state: self.state.clone() })
    }

    pub fn sync_logs(&self) -> Arc<InMemorySyncLogs> {
        Arc::new(InMemorySyncLogs { state: self.state.clone() })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn integration(&self, id: Uuid) -> Option<CalendarIntegration> {
        self.with_state(|s| s.integrations.iter().find(|i| i.id == id).cloned())
    }

    pub fn events_of(&self, integration_id: Uuid) -> Vec<CalendarEvent> {
        self.with_state(|s| {
            s.events.iter().filter(|e| e.integration_id == integration_id).cloned().collect()
        })
    }

    pub fn logs_of(&self, integration_id: Uuid) -> Vec<SyncLog> {
        self.with_state(|s| {
            s.logs.iter().filter(|l| l.integration_id == integration_id).cloned().collect()
        })
    }
}

pub struct InMemoryIntegrations {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl IntegrationRepository for InMemoryIntegrations {
    async fn upsert(&self, integration: &CalendarIntegration) -> Result<CalendarIntegration> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .integrations
            .iter_mut()
            .find(|i| i.user_id == integration.user_id && i.provider == integration.provider);

        match existing {
            Some(row) => {
                let mut updated = integration.clone();
                updated.id = row.id;
                updated.created_at = row.created_at;
                updated.sync_in_progress = row.sync_in_progress;
                updated.sync_started_at = row.sync_started_at;
                *row = updated.clone();
                Ok(updated)
            }
            None => {
                state.integrations.push(integration.clone());
                Ok(integration.clone())
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CalendarIntegration>> {
        let state = self.state.lock().unwrap();
        Ok(state.integrations.iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_user_provider(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .integrations
            .iter()
            .find(|i| i.user_id == user_id && i.provider == provider)
            .cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CalendarIntegration>> {
        let state = self.state.lock().unwrap();
        Ok(state.integrations.iter().filter(|i| i.user_id == user_id).cloned().collect())
    }

    async fn list_syncable(&self, filter: &IntegrationFilter) -> Result<Vec<CalendarIntegration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .integrations
            .iter()
            .filter(|i| i.is_active && i.sync_enabled)
            .filter(|i| filter.integration_id.is_none_or(|id| i.id == id))
            .filter(|i| filter.user_id.as_deref().is_none_or(|u| i.user_id == u))
            .filter(|i| filter.provider.is_none_or(|p| i.provider == p))
            .cloned()
            .collect())
    }

    async fn update_tokens(&self, id: Uuid, update: &TokenUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.token_updates += 1;
        let row = state
            .integrations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| CalSyncError::NotFound(format!("integration {id}")))?;
        row.access_token = update.access_token.clone();
        row.refresh_token = update.refresh_token.clone();
        row.token_expiry = update.token_expiry;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn set_sync_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.integrations.iter_mut().find(|i| i.id == id) {
            row.sync_enabled = enabled;
        }
        Ok(())
    }

    async fn try_begin_sync(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.integrations.iter_mut().find(|i| i.id == id) {
            Some(row) if !row.sync_in_progress => {
                row.sync_in_progress = true;
                row.sync_started_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_sync(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        completed: bool,
        errors: Option<Vec<SyncErrorRecord>>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.integrations.iter_mut().find(|i| i.id == id) {
            row.sync_in_progress = false;
            row.sync_started_at = None;
            row.sync_errors = errors;
            if completed {
                row.last_sync_at = Some(finished_at);
            }
        }
        Ok(())
    }

    async fn release_stale_sync_flags(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for row in state.integrations.iter_mut() {
            if row.sync_in_progress && row.sync_started_at.is_some_and(|at| at < started_before) {
                row.sync_in_progress = false;
                row.sync_started_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.integrations.len();
        state.integrations.retain(|i| i.id != id);
        state.events.retain(|e| e.integration_id != id);
        state.logs.retain(|l| l.integration_id != id);
        Ok(state.integrations.len() != before)
    }
}

pub struct InMemoryEvents {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl CalendarEventRepository for InMemoryEvents {
    async fn find_by_provider_event_id(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<CalendarEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|e| {
                e.integration_id == integration_id && e.provider_event_id == provider_event_id
            })
            .cloned())
    }

    async fn find_by_provider_event_ids(
        &self,
        integration_id: Uuid,
        provider_event_ids: &[String],
    ) -> Result<Vec<CalendarEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.integration_id == integration_id)
            .filter(|e| provider_event_ids.contains(&e.provider_event_id))
            .cloned()
            .collect())
    }

    async fn list_in_window(
        &self,
        integration_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.integration_id == integration_id)
            .filter(|e| {
                let at = e.start.to_utc();
                at >= start && at < end
            })
            .cloned()
            .collect())
    }

    async fn upsert_from_provider(&self, event: &CalendarEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_event_ids.contains(&event.provider_event_id) {
            return Err(CalSyncError::Database(format!(
                "constraint failed for {}",
                event.provider_event_id
            )));
        }

        let existing = state.events.iter_mut().find(|e| {
            e.integration_id == event.integration_id
                && e.provider_event_id == event.provider_event_id
        });
        match existing {
            Some(row) => {
                let mut updated = event.clone();
                updated.id = row.id;
                updated.created_at = row.created_at;
                updated.session_id = row.session_id.clone();
                updated.is_coaching_session = row.is_coaching_session;
                updated.is_blocked = row.is_blocked;
                *row = updated;
            }
            None => state.events.push(event.clone()),
        }
        Ok(())
    }

    async fn save_linked(&self, event: &CalendarEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_save_linked {
            return Err(CalSyncError::Database("disk I/O error".into()));
        }

        let existing = state.events.iter_mut().find(|e| {
            e.integration_id == event.integration_id
                && e.provider_event_id == event.provider_event_id
        });
        match existing {
            Some(row) => {
                let mut updated = event.clone();
                updated.id = row.id;
                updated.created_at = row.created_at;
                *row = updated;
            }
            None => state.events.push(event.clone()),
        }
        Ok(())
    }

    async fn delete(&self, integration_id: Uuid, provider_event_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.events.len();
        state.events.retain(|e| {
            !(e.integration_id == integration_id && e.provider_event_id == provider_event_id)
        });
        Ok(state.events.len() != before)
    }

    async fn delete_by_integration(&self, integration_id: Uuid) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let before = state.events.len();
        state.events.retain(|e| e.integration_id != integration_id);
        Ok(before - state.events.len())
    }
}

pub struct InMemorySyncLogs {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl SyncLogRepository for InMemorySyncLogs {
    async fn insert(&self, log: &SyncLog) -> Result<()> {
        self.state.lock().unwrap().logs.push(log.clone());
        Ok(())
    }

    async fn update_state(&self, id: Uuid, run_state: SyncRunState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.logs.iter_mut().find(|l| l.id == id) {
            row.state = run_state;
        }
        Ok(())
    }

    async fn finalize(&self, log: &SyncLog) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) =
            state.logs.iter_mut().find(|l| l.id == log.id && l.status == SyncLogStatus::Started)
        {
            *row = log.clone();
        }
        Ok(())
    }

    async fn list_for_integration(
        &self,
        integration_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SyncLog>> {
        let state = self.state.lock().unwrap();
        let mut logs: Vec<_> =
            state.logs.iter().filter(|l| l.integration_id == integration_id).cloned().collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn fail_stale(&self, started_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut failed = 0;
        for row in state.logs.iter_mut() {
            if row.status == SyncLogStatus::Started && row.started_at < started_before {
                let counts = row.counts;
                let errors = row.errors.clone();
                row.fail(counts, errors, now);
                failed += 1;
            }
        }
        Ok(failed)
    }
}
