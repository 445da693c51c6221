//! Google Calendar API v3 adapter

use async_trait::async_trait;
use calsync_core::CalendarProviderAdapter;
use calsync_domain::{
    Attendee, AttendeeStatus, CalSyncError, CalendarMetadata, CalendarProvider, Credentials,
    EventStatus, EventTime, ExternalEvent, NewEventData, OAuthClientConfig, Result,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::validate_and_log_email;
use crate::http::HttpClient;
use crate::integrations::calendar::oauth::{OAuthClient, OAuthSettings};
use crate::integrations::calendar::{ensure_success, is_gone, read_json};

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const PAGE_SIZE: &str = "250";

/// Google Calendar adapter
pub struct GoogleCalendarAdapter {
    oauth: OAuthClient,
    http: HttpClient,
    api_base: String,
}

impl GoogleCalendarAdapter {
    pub fn new(config: &OAuthClientConfig, http: HttpClient) -> Self {
        let api_base =
            config.api_base_url.clone().unwrap_or_else(|| GOOGLE_CALENDAR_API_BASE.to_string());
        Self::with_settings(OAuthSettings::google(config), api_base, http)
    }

    pub fn with_settings(
        settings: OAuthSettings,
        api_base: impl Into<String>,
        http: HttpClient,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { oauth: OAuthClient::new(settings, http.clone()), http, api_base }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }

    fn authorized(&self, method: Method, url: &str, credentials: &Credentials) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&credentials.access_token)
    }

    async fn write_event(
        &self,
        method: Method,
        url: &str,
        credentials: &Credentials,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        event.validate()?;
        let request = self.authorized(method, url, credentials).json(&GoogleEventBody::from(event));
        let created: GoogleEvent = read_json(self.http.send(request).await?).await?;
        created.into_external("UTC")
    }
}

#[async_trait]
impl CalendarProviderAdapter for GoogleCalendarAdapter {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Google
    }

    fn get_auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorize_url(user_id, redirect_uri)
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credentials> {
        self.oauth.exchange_code(code, redirect_uri).await
    }

    async fn refresh_tokens(&self, credentials: &Credentials) -> Result<Credentials> {
        self.oauth.refresh(credentials).await
    }

    #[instrument(skip(self, credentials))]
    async fn get_calendars(&self, credentials: &Credentials) -> Result<Vec<CalendarMetadata>> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self.authorized(Method::GET, &url, credentials).query(&query);
            let page: CalendarListResponse = read_json(self.http.send(request).await?).await?;

            calendars.extend(page.items.into_iter().map(CalendarListEntry::into_metadata));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = calendars.len(), "listed google calendars");
        Ok(calendars)
    }

    #[instrument(skip(self, credentials))]
    async fn get_events(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>> {
        let url = self.events_url(calendar_id);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timeMax", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("showDeleted", "true".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let request = self.authorized(Method::GET, &url, credentials).query(&query);
            let page: EventsResponse = read_json(self.http.send(request).await?).await?;
            let calendar_tz = page.time_zone.as_deref().unwrap_or("UTC");

            for item in page.items {
                let event_id = item.id.clone();
                match item.into_external(calendar_tz) {
                    Ok(event) => events.push(event),
                    Err(err) => warn!(event_id, error = %err, "skipping unreadable google event"),
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        events.sort_by_key(|event| event.start.to_utc());
        debug!(count = events.len(), "fetched google events");
        Ok(events)
    }

    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        self.write_event(Method::POST, &self.events_url(calendar_id), credentials, event).await
    }

    async fn update_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        let url = self.event_url(calendar_id, event_id);
        self.write_event(Method::PUT, &url, credentials, event).await
    }

    async fn delete_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<()> {
        let url = self.event_url(calendar_id, event_id);
        let response = self.http.send(self.authorized(Method::DELETE, &url, credentials)).await?;
        if is_gone(response.status()) {
            debug!(event_id, "google event already deleted");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn validate_tokens(&self, credentials: &Credentials) -> Result<bool> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let request =
            self.authorized(Method::GET, &url, credentials).query(&[("maxResults", "1")]);
        let response = self.http.send(request).await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }

    async fn revoke_tokens(&self, credentials: &Credentials) -> Result<()> {
        let token = credentials.refresh_token.as_deref().unwrap_or(&credentials.access_token);
        if let Err(err) = self.oauth.revoke(token).await {
            warn!(error = %err, "google token revocation failed");
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Wire types */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    summary: Option<String>,
    summary_override: Option<String>,
    time_zone: Option<String>,
    #[serde(default)]
    primary: bool,
    access_role: Option<String>,
}

impl CalendarListEntry {
    fn into_metadata(self) -> CalendarMetadata {
        // The primary calendar's id is the account email.
        let owner = self.primary.then(|| self.id.clone());
        CalendarMetadata {
            name: self.summary_override.or(self.summary).unwrap_or_else(|| self.id.clone()),
            id: self.id,
            timezone: self.time_zone,
            is_primary: self.primary,
            access_role: self.access_role.unwrap_or_else(|| "reader".to_string()),
            owner,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleDateTime>,
    end: Option<GoogleDateTime>,
    original_start_time: Option<GoogleDateTime>,
    #[serde(default)]
    attendees: Vec<GoogleAttendee>,
    #[serde(default)]
    recurrence: Vec<String>,
    visibility: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAttendee {
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventBody {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start: GoogleDateTime,
    end: GoogleDateTime,
    attendees: Vec<GoogleAttendee>,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<String>,
}

impl From<&NewEventData> for GoogleEventBody {
    fn from(event: &NewEventData) -> Self {
        Self {
            summary: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: GoogleDateTime::from(&event.start),
            end: GoogleDateTime::from(&event.end),
            attendees: event
                .attendees
                .iter()
                .map(|attendee| GoogleAttendee {
                    email: Some(attendee.email.clone()),
                    display_name: attendee.name.clone(),
                    response_status: None,
                })
                .collect(),
            status: event.status.to_string(),
            visibility: event.visibility.map(|visibility| visibility.to_string()),
        }
    }
}

impl From<&EventTime> for GoogleDateTime {
    fn from(time: &EventTime) -> Self {
        match time {
            EventTime::AllDay { date } => {
                Self { date: Some(date.format("%Y-%m-%d").to_string()), ..Self::default() }
            }
            EventTime::Timed { at, timezone } => Self {
                date: None,
                date_time: Some(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                time_zone: Some(timezone.clone()),
            },
        }
    }
}

impl GoogleDateTime {
    fn to_event_time(&self, calendar_tz: &str) -> Result<EventTime> {
        if let Some(date) = &self.date {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|err| {
                CalSyncError::ProviderApi(format!("invalid google date '{date}': {err}"))
            })?;
            return Ok(EventTime::all_day(date));
        }

        let raw = self.date_time.as_deref().ok_or_else(|| {
            CalSyncError::ProviderApi("google event boundary has neither date nor dateTime".into())
        })?;
        let at = DateTime::parse_from_rfc3339(raw)
            .map_err(|err| {
                CalSyncError::ProviderApi(format!("invalid google dateTime '{raw}': {err}"))
            })?
            .with_timezone(&Utc);
        let timezone = self.time_zone.clone().unwrap_or_else(|| calendar_tz.to_string());
        Ok(EventTime::timed(at, timezone))
    }
}

fn attendee_status(raw: &str) -> Option<AttendeeStatus> {
    match raw {
        "accepted" => Some(AttendeeStatus::Accepted),
        "declined" => Some(AttendeeStatus::Declined),
        "tentative" => Some(AttendeeStatus::Tentative),
        "needsAction" => Some(AttendeeStatus::NeedsAction),
        _ => None,
    }
}

impl GoogleEvent {
    fn into_external(self, calendar_tz: &str) -> Result<ExternalEvent> {
        // Cancelled instances of a series only carry originalStartTime.
        let start = self.start.as_ref().or(self.original_start_time.as_ref()).ok_or_else(|| {
            CalSyncError::ProviderApi(format!("google event {} has no start", self.id))
        })?;
        let start = start.to_event_time(calendar_tz)?;
        let end = match &self.end {
            Some(end) => end.to_event_time(calendar_tz)?,
            None => start.clone(),
        };

        let status = match self.status.as_deref() {
            Some("cancelled") => EventStatus::Cancelled,
            Some("tentative") => EventStatus::Tentative,
            _ => EventStatus::Confirmed,
        };

        let attendees = self
            .attendees
            .into_iter()
            .filter_map(|attendee| {
                let email = validate_and_log_email(attendee.email.as_deref()?, &self.id)?;
                Some(Attendee {
                    email,
                    name: attendee.display_name,
                    status: attendee.response_status.as_deref().and_then(attendee_status),
                })
            })
            .collect();

        let recurrence_rule = self
            .recurrence
            .iter()
            .find_map(|line| line.strip_prefix("RRULE:"))
            .map(str::to_string);

        Ok(ExternalEvent {
            provider_event_id: self.id,
            title: self.summary.unwrap_or_default(),
            description: self.description,
            start,
            end,
            location: self.location,
            attendees,
            recurrence_rule,
            status,
            visibility: self.visibility.as_deref().and_then(|raw| raw.parse().ok()),
        })
    }
}
