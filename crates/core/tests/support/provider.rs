use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::CalendarProviderAdapter;
use calsync_domain::{
    CalSyncError, CalendarMetadata, CalendarProvider, Credentials, EventStatus, EventTime,
    ExternalEvent, NewEventData, Result,
};
use chrono::{DateTime, Utc};

/// Scripted provider behaviour and a record of what was called.
pub struct FakeProviderState {
    pub calendars: Vec<CalendarMetadata>,
    pub events: Vec<ExternalEvent>,
    pub exchanged: Credentials,
    /// Returned by `refresh_tokens`; `None` makes the refresh fail with
    /// `Auth`.
    pub refreshed: Option<Credentials>,
    pub refresh_delay: Duration,
    pub get_events_delay: Duration,
    pub failing_calendars: HashSet<String>,
    pub fail_revoke: bool,
    pub fail_create: bool,
    pub tokens_valid: bool,
    pub refresh_calls: usize,
    pub revoke_calls: usize,
    pub exchanged_codes: Vec<String>,
    pub created: Vec<ExternalEvent>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    next_event_id: usize,
}

impl Default for FakeProviderState {
    fn default() -> Self {
        Self {
            calendars: Vec::new(),
            events: Vec::new(),
            exchanged: super::fresh_credentials("ya29.exchanged"),
            refreshed: Some(super::fresh_credentials("ya29.refreshed")),
            refresh_delay: Duration::ZERO,
            get_events_delay: Duration::ZERO,
            failing_calendars: HashSet::new(),
            fail_revoke: false,
            fail_create: false,
            tokens_valid: true,
            refresh_calls: 0,
            revoke_calls: 0,
            exchanged_codes: Vec::new(),
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            next_event_id: 1,
        }
    }
}

#[derive(Clone)]
pub struct FakeProvider {
    provider: CalendarProvider,
    state: Arc<Mutex<FakeProviderState>>,
}

impl FakeProvider {
    pub fn new(provider: CalendarProvider) -> Self {
        Self { provider, state: Arc::new(Mutex::new(FakeProviderState::default())) }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeProviderState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

fn event_from(id: String, data: &NewEventData) -> ExternalEvent {
    ExternalEvent {
        provider_event_id: id,
        title: data.title.clone(),
        description: data.description.clone(),
        start: data.start.clone(),
        end: data.end.clone(),
        location: data.location.clone(),
        attendees: data.attendees.clone(),
        recurrence_rule: None,
        status: data.status,
        visibility: data.visibility,
    }
}

#[async_trait]
impl CalendarProviderAdapter for FakeProvider {
    fn provider(&self) -> CalendarProvider {
        self.provider
    }

    fn get_auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<String> {
        Ok(format!("https://auth.example.test/authorize?state={user_id}&redirect={redirect_uri}"))
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<Credentials> {
        let mut state = self.state.lock().unwrap();
        if code == "bad-code" {
            return Err(CalSyncError::Auth("invalid_grant".into()));
        }
        state.exchanged_codes.push(code.to_string());
        Ok(state.exchanged.clone())
    }

    async fn refresh_tokens(&self, _credentials: &Credentials) -> Result<Credentials> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.refresh_calls += 1;
            state.refresh_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .refreshed
            .clone()
            .ok_or_else(|| CalSyncError::Auth("invalid_grant: refresh token revoked".into()))
    }

    async fn get_calendars(&self, _credentials: &Credentials) -> Result<Vec<CalendarMetadata>> {
        Ok(self.state.lock().unwrap().calendars.clone())
    }

    async fn get_events(
        &self,
        _credentials: &Credentials,
        calendar_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>> {
        let (delay, failing, events) = {
            let state = self.state.lock().unwrap();
            (
                state.get_events_delay,
                state.failing_calendars.contains(calendar_id),
                state.events.clone(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(CalSyncError::ProviderApi(format!("403 on calendar {calendar_id}")));
        }
        Ok(events)
    }

    async fn create_event(
        &self,
        _credentials: &Credentials,
        _calendar_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(CalSyncError::ProviderApi("429 rate limited".into()));
        }
        let id = format!("created-{}", state.next_event_id);
        state.next_event_id += 1;
        let created = event_from(id, event);
        state.created.push(created.clone());
        Ok(created)
    }

    async fn update_event(
        &self,
        _credentials: &Credentials,
        _calendar_id: &str,
        event_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        self.state.lock().unwrap().updated.push(event_id.to_string());
        Ok(event_from(event_id.to_string(), event))
    }

    async fn delete_event(
        &self,
        _credentials: &Credentials,
        _calendar_id: &str,
        event_id: &str,
    ) -> Result<()> {
        self.state.lock().unwrap().deleted.push(event_id.to_string());
        Ok(())
    }

    async fn validate_tokens(&self, _credentials: &Credentials) -> Result<bool> {
        Ok(self.state.lock().unwrap().tokens_valid)
    }

    async fn revoke_tokens(&self, _credentials: &Credentials) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.revoke_calls += 1;
        if state.fail_revoke {
            return Err(CalSyncError::Network("connection reset by peer".into()));
        }
        Ok(())
    }
}

/// Timed provider event starting `start` and lasting an hour.
pub fn external_event(id: &str, start: DateTime<Utc>) -> ExternalEvent {
    ExternalEvent {
        provider_event_id: id.into(),
        title: format!("Meeting {id}"),
        description: None,
        start: EventTime::utc(start),
        end: EventTime::utc(start + chrono::Duration::hours(1)),
        location: None,
        attendees: Vec::new(),
        recurrence_rule: None,
        status: EventStatus::Confirmed,
        visibility: None,
    }
}

pub fn calendar(id: &str, is_primary: bool) -> CalendarMetadata {
    CalendarMetadata {
        id: id.into(),
        name: format!("Calendar {id}"),
        timezone: Some("Europe/Berlin".into()),
        is_primary,
        access_role: "owner".into(),
        owner: Some("coach@example.com".into()),
    }
}
