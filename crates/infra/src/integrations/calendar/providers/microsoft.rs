//! Microsoft Graph v1.0 calendar adapter

use async_trait::async_trait;
use calsync_core::CalendarProviderAdapter;
use calsync_domain::{
    Attendee, AttendeeStatus, CalSyncError, CalendarMetadata, CalendarProvider, Credentials,
    EventStatus, EventTime, EventVisibility, ExternalEvent, NewEventData, OAuthClientConfig,
    Result,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::validate_and_log_email;
use crate::http::HttpClient;
use crate::integrations::calendar::oauth::{OAuthClient, OAuthSettings};
use crate::integrations::calendar::{ensure_success, is_gone, read_json};

const MICROSOFT_GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const OUTLOOK_TIMEZONE_HEADER: &str = r#"outlook.timezone="UTC""#;
const PAGE_SIZE: &str = "100";

/// Microsoft Calendar (Outlook / Microsoft 365) adapter
pub struct MicrosoftCalendarAdapter {
    oauth: OAuthClient,
    http: HttpClient,
    api_base: String,
}

impl MicrosoftCalendarAdapter {
    pub fn new(config: &OAuthClientConfig, http: HttpClient) -> Self {
        let api_base =
            config.api_base_url.clone().unwrap_or_else(|| MICROSOFT_GRAPH_API_BASE.to_string());
        Self {
            oauth: OAuthClient::new(OAuthSettings::microsoft(config), http.clone()),
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Every request asks Graph to report times in UTC.
    fn authorized(&self, method: Method, url: &str, credentials: &Credentials) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&credentials.access_token)
            .header("Prefer", OUTLOOK_TIMEZONE_HEADER)
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/me/events/{}", self.api_base, urlencoding::encode(event_id))
    }

    /// Follow `@odata.nextLink` until the collection is exhausted.
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut request = self.authorized(Method::GET, url, credentials).query(query);
        loop {
            let page: GraphPage<T> = read_json(self.http.send(request).await?).await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) => request = self.authorized(Method::GET, &next, credentials),
                None => break,
            }
        }
        Ok(items)
    }

    async fn write_event(
        &self,
        method: Method,
        url: &str,
        credentials: &Credentials,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        event.validate()?;
        let request = self.authorized(method, url, credentials).json(&GraphEventBody::from(event));
        let written: GraphEvent = read_json(self.http.send(request).await?).await?;
        written.into_external()
    }
}

#[async_trait]
impl CalendarProviderAdapter for MicrosoftCalendarAdapter {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Microsoft
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
        let url = format!("{}/me/calendars", self.api_base);
        let calendars: Vec<GraphCalendar> = self.fetch_all(credentials, &url, &[]).await?;
        debug!(count = calendars.len(), "listed microsoft calendars");
        Ok(calendars.into_iter().map(GraphCalendar::into_metadata).collect())
    }

    #[instrument(skip(self, credentials))]
    async fn get_events(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>> {
        let url = format!(
            "{}/me/calendars/{}/calendarView",
            self.api_base,
            urlencoding::encode(calendar_id)
        );
        let query = [
            ("startDateTime", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("endDateTime", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("$orderby", "start/dateTime".to_string()),
            ("$top", PAGE_SIZE.to_string()),
        ];

        let raw: Vec<GraphEvent> = self.fetch_all(credentials, &url, &query).await?;
        let mut events = Vec::with_capacity(raw.len());
        for item in raw {
            let event_id = item.id.clone();
            match item.into_external() {
                Ok(event) => events.push(event),
                Err(err) => warn!(event_id, error = %err, "skipping unreadable microsoft event"),
            }
        }

        events.sort_by_key(|event| event.start.to_utc());
        debug!(count = events.len(), "fetched microsoft events");
        Ok(events)
    }

    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        let url =
            format!("{}/me/calendars/{}/events", self.api_base, urlencoding::encode(calendar_id));
        self.write_event(Method::POST, &url, credentials, event).await
    }

    async fn update_event(
        &self,
        credentials: &Credentials,
        _calendar_id: &str,
        event_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        self.write_event(Method::PATCH, &self.event_url(event_id), credentials, event).await
    }

    async fn delete_event(
        &self,
        credentials: &Credentials,
        _calendar_id: &str,
        event_id: &str,
    ) -> Result<()> {
        let request = self.authorized(Method::DELETE, &self.event_url(event_id), credentials);
        let response = self.http.send(request).await?;
        if is_gone(response.status()) {
            debug!(event_id, "microsoft event already deleted");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn validate_tokens(&self, credentials: &Credentials) -> Result<bool> {
        let url = format!("{}/me/calendars", self.api_base);
        let request = self.authorized(Method::GET, &url, credentials).query(&[("$top", "1")]);
        let response = self.http.send(request).await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }

    /// Graph has no per-token revoke endpoint for delegated tokens.
    async fn revoke_tokens(&self, _credentials: &Credentials) -> Result<()> {
        debug!("microsoft tokens expire on their own; nothing to revoke");
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Wire types */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphCalendar {
    id: String,
    name: Option<String>,
    #[serde(default)]
    is_default_calendar: bool,
    #[serde(default)]
    can_edit: bool,
    owner: Option<GraphEmailAddress>,
}

impl GraphCalendar {
    fn into_metadata(self) -> CalendarMetadata {
        CalendarMetadata {
            name: self.name.unwrap_or_else(|| "Calendar".to_string()),
            id: self.id,
            timezone: None,
            is_primary: self.is_default_calendar,
            access_role: if self.can_edit { "writer" } else { "reader" }.to_string(),
            owner: self.owner.and_then(|owner| owner.address),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEmailAddress {
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    body: Option<GraphBody>,
    start: GraphDateTime,
    end: GraphDateTime,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    show_as: Option<String>,
    sensitivity: Option<String>,
    location: Option<GraphLocation>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
    recurrence: Option<PatternedRecurrence>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: Option<GraphEmailAddress>,
    status: Option<GraphResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct GraphResponseStatus {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PatternedRecurrence {
    pattern: RecurrencePattern,
    range: Option<RecurrenceRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecurrencePattern {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "default_interval")]
    interval: u32,
    #[serde(default)]
    days_of_week: Vec<String>,
    #[serde(default)]
    day_of_month: u32,
    #[serde(default)]
    month: u32,
    index: Option<String>,
}

fn default_interval() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecurrenceRange {
    #[serde(rename = "type")]
    kind: String,
    end_date: Option<String>,
    #[serde(default)]
    number_of_occurrences: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphEventBody {
    subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<GraphBody>,
    start: GraphDateTime,
    end: GraphDateTime,
    is_all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<GraphLocation>,
    attendees: Vec<GraphAttendeeBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    show_as: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensitivity: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendeeBody {
    email_address: GraphEmailAddress,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl From<&EventTime> for GraphDateTime {
    fn from(time: &EventTime) -> Self {
        let naive = match time {
            EventTime::AllDay { date } => date.and_time(chrono::NaiveTime::MIN),
            EventTime::Timed { at, .. } => at.naive_utc(),
        };
        Self {
            date_time: naive.format("%Y-%m-%dT%H:%M:%S").to_string(),
            time_zone: Some("UTC".to_string()),
        }
    }
}

impl From<&NewEventData> for GraphEventBody {
    fn from(event: &NewEventData) -> Self {
        Self {
            subject: event.title.clone(),
            body: event.description.as_ref().map(|content| GraphBody {
                content_type: "text".to_string(),
                content: content.clone(),
            }),
            start: GraphDateTime::from(&event.start),
            end: GraphDateTime::from(&event.end),
            is_all_day: event.start.is_all_day(),
            location: event
                .location
                .as_ref()
                .map(|name| GraphLocation { display_name: Some(name.clone()) }),
            attendees: event
                .attendees
                .iter()
                .map(|attendee| GraphAttendeeBody {
                    email_address: GraphEmailAddress {
                        address: Some(attendee.email.clone()),
                        name: attendee.name.clone(),
                    },
                    kind: "required",
                })
                .collect(),
            show_as: (event.status == EventStatus::Tentative).then(|| "tentative".to_string()),
            sensitivity: event.visibility.map(|visibility| {
                match visibility {
                    EventVisibility::Private => "private",
                    EventVisibility::Confidential => "confidential",
                    EventVisibility::Default | EventVisibility::Public => "normal",
                }
                .to_string()
            }),
        }
    }
}

impl GraphDateTime {
    /// Graph reports wall-clock time plus a zone name; with the UTC `Prefer`
    /// header the zone is always UTC.
    fn to_utc(&self) -> Result<DateTime<Utc>> {
        let raw = self.date_time.trim();
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Ok(at.with_timezone(&Utc));
        }

        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map_err(|err| {
            CalSyncError::ProviderApi(format!("invalid graph dateTime '{raw}': {err}"))
        })?;

        match self.time_zone.as_deref() {
            None => Ok(naive.and_utc()),
            Some(zone) if zone.eq_ignore_ascii_case("utc") => Ok(naive.and_utc()),
            Some(zone) => {
                let tz: Tz = zone.parse().map_err(|_| {
                    CalSyncError::ProviderApi(format!("unsupported graph time zone '{zone}'"))
                })?;
                tz.from_local_datetime(&naive)
                    .earliest()
                    .map(|local| local.with_timezone(&Utc))
                    .ok_or_else(|| {
                        CalSyncError::ProviderApi(format!("'{raw}' does not exist in {zone}"))
                    })
            }
        }
    }

    fn to_event_time(&self, all_day: bool) -> Result<EventTime> {
        let at = self.to_utc()?;
        if all_day {
            return Ok(EventTime::all_day(at.date_naive()));
        }
        Ok(EventTime::timed(at, self.time_zone.clone().unwrap_or_else(|| "UTC".to_string())))
    }
}

fn attendee_status(raw: &str) -> Option<AttendeeStatus> {
    match raw {
        "accepted" | "organizer" => Some(AttendeeStatus::Accepted),
        "declined" => Some(AttendeeStatus::Declined),
        "tentativelyAccepted" => Some(AttendeeStatus::Tentative),
        "none" | "notResponded" => Some(AttendeeStatus::NeedsAction),
        _ => None,
    }
}

fn visibility(raw: &str) -> Option<EventVisibility> {
    match raw {
        "normal" => Some(EventVisibility::Default),
        "personal" | "private" => Some(EventVisibility::Private),
        "confidential" => Some(EventVisibility::Confidential),
        _ => None,
    }
}

impl RecurrencePattern {
    fn by_day(&self) -> String {
        let prefix = match self.index.as_deref() {
            Some("second") => "2",
            Some("third") => "3",
            Some("fourth") => "4",
            Some("last") => "-1",
            Some("first") if self.kind.starts_with("relative") => "1",
            _ => "",
        };
        self.days_of_week
            .iter()
            .filter_map(|day| {
                let code = match day.to_ascii_lowercase().as_str() {
                    "monday" => "MO",
                    "tuesday" => "TU",
                    "wednesday" => "WE",
                    "thursday" => "TH",
                    "friday" => "FR",
                    "saturday" => "SA",
                    "sunday" => "SU",
                    _ => return None,
                };
                Some(format!("{prefix}{code}"))
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PatternedRecurrence {
    /// Single RRULE (without the `RRULE:` prefix) equivalent to the Graph
    /// pattern, or None for pattern types with no mapping.
    fn to_rrule(&self) -> Option<String> {
        let pattern = &self.pattern;
        let mut parts = match pattern.kind.as_str() {
            "daily" => vec!["FREQ=DAILY".to_string()],
            "weekly" => vec!["FREQ=WEEKLY".to_string(), format!("BYDAY={}", pattern.by_day())],
            "absoluteMonthly" => {
                vec!["FREQ=MONTHLY".to_string(), format!("BYMONTHDAY={}", pattern.day_of_month)]
            }
            "relativeMonthly" => {
                vec!["FREQ=MONTHLY".to_string(), format!("BYDAY={}", pattern.by_day())]
            }
            "absoluteYearly" => vec![
                "FREQ=YEARLY".to_string(),
                format!("BYMONTH={}", pattern.month),
                format!("BYMONTHDAY={}", pattern.day_of_month),
            ],
            "relativeYearly" => vec![
                "FREQ=YEARLY".to_string(),
                format!("BYMONTH={}", pattern.month),
                format!("BYDAY={}", pattern.by_day()),
            ],
            _ => return None,
        };
        if pattern.interval > 1 {
            parts.push(format!("INTERVAL={}", pattern.interval));
        }

        if let Some(range) = &self.range {
            match range.kind.as_str() {
                "endDate" => {
                    if let Some(end) = &range.end_date {
                        parts.push(format!("UNTIL={}", end.replace('-', "")));
                    }
                }
                "numbered" if range.number_of_occurrences > 0 => {
                    parts.push(format!("COUNT={}", range.number_of_occurrences));
                }
                _ => {}
            }
        }
        Some(parts.join(";"))
    }
}

impl GraphEvent {
    fn into_external(self) -> Result<ExternalEvent> {
        let start = self.start.to_event_time(self.is_all_day)?;
        let end = self.end.to_event_time(self.is_all_day)?;

        let status = if self.is_cancelled {
            EventStatus::Cancelled
        } else if self.show_as.as_deref() == Some("tentative") {
            EventStatus::Tentative
        } else {
            EventStatus::Confirmed
        };

        let description = match self.body {
            Some(body) if body.content_type.eq_ignore_ascii_case("text") => Some(body.content),
            _ => self.body_preview,
        }
        .filter(|text| !text.trim().is_empty());

        let attendees = self
            .attendees
            .into_iter()
            .filter_map(|attendee| {
                let address = attendee.email_address?;
                let email = validate_and_log_email(address.address.as_deref()?, &self.id)?;
                Some(Attendee {
                    email,
                    name: address.name,
                    status: attendee
                        .status
                        .and_then(|status| status.response)
                        .as_deref()
                        .and_then(attendee_status),
                })
            })
            .collect();

        Ok(ExternalEvent {
            recurrence_rule: self.recurrence.as_ref().and_then(PatternedRecurrence::to_rrule),
            provider_event_id: self.id,
            title: self.subject.unwrap_or_default(),
            description,
            start,
            end,
            location: self
                .location
                .and_then(|location| location.display_name)
                .filter(|name| !name.trim().is_empty()),
            attendees,
            status,
            visibility: self.sensitivity.as_deref().and_then(visibility),
        })
    }
}
