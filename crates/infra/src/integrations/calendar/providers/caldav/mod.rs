//! CalDAV adapter (Apple iCloud and compatible servers)
//!
//! There is no OAuth flow. The "authorization code" is a base64 JSON bundle of
//! `{username, appPassword, serverUrl?}` collected by the caller, and the same
//! bundle is stored as the access token. Every request carries Basic auth.

pub mod ics;
pub mod xml;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use calsync_core::CalendarProviderAdapter;
use calsync_domain::constants::CALDAV_MANUAL_AUTH_URL;
use calsync_domain::{
    CalDavConfig, CalSyncError, CalendarMetadata, CalendarProvider, Credentials, ExternalEvent,
    NewEventData, Result,
};
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use self::xml::DavResource;
use crate::http::HttpClient;
use crate::integrations::calendar::{ensure_success, is_gone};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Account bundle for one CalDAV login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalDavAccount {
    pub username: String,
    pub app_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

impl std::fmt::Debug for CalDavAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalDavAccount")
            .field("username", &self.username)
            .field("app_password", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}

impl CalDavAccount {
    /// Decode the base64 JSON bundle handed over as the authorization code.
    pub fn from_auth_code(code: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(code.trim())
            .map_err(|_| CalSyncError::Auth("CalDAV credentials are not valid base64".into()))?;
        let account: Self = serde_json::from_slice(&raw)
            .map_err(|_| CalSyncError::Auth("CalDAV credentials bundle is malformed".into()))?;
        account.checked()
    }

    /// Recover the account from stored credentials.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let account: Self = serde_json::from_str(&credentials.access_token)
            .map_err(|_| CalSyncError::Auth("stored CalDAV credentials are malformed".into()))?;
        account.checked()
    }

    /// Encode as an authorization code, the inverse of `from_auth_code`.
    pub fn to_auth_code(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|err| CalSyncError::Internal(format!("encode CalDAV account: {err}")))?;
        Ok(STANDARD.encode(json))
    }

    fn checked(self) -> Result<Self> {
        if self.username.trim().is_empty() || self.app_password.is_empty() {
            return Err(CalSyncError::Auth("CalDAV username and app password are required".into()));
        }
        Ok(self)
    }

    fn into_credentials(self) -> Result<Credentials> {
        let access_token = serde_json::to_string(&self)
            .map_err(|err| CalSyncError::Internal(format!("encode CalDAV account: {err}")))?;
        let mut credentials = Credentials::new(access_token);
        credentials.account_id = Some(self.username);
        Ok(credentials)
    }
}

/// CalDAV adapter, registered as the Apple provider.
pub struct CalDavCalendarAdapter {
    http: HttpClient,
    server_url: String,
}

impl CalDavCalendarAdapter {
    pub fn new(config: &CalDavConfig, http: HttpClient) -> Self {
        Self { http, server_url: config.server_url.clone() }
    }

    fn base_url(&self, account: &CalDavAccount) -> Result<Url> {
        let raw = account.server_url.as_deref().unwrap_or(&self.server_url);
        Url::parse(raw)
            .map_err(|err| CalSyncError::Config(format!("invalid CalDAV server url {raw}: {err}")))
    }

    fn dav(
        &self,
        method: Method,
        url: Url,
        account: &CalDavAccount,
        depth: Option<&str>,
    ) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .basic_auth(&account.username, Some(&account.app_password));
        match depth {
            Some(depth) => builder.header("Depth", depth),
            None => builder,
        }
    }

    async fn multistatus(
        &self,
        method: Method,
        url: Url,
        account: &CalDavAccount,
        depth: &str,
        body: String,
    ) -> Result<Vec<DavResource>> {
        let request = self
            .dav(method, url, account, Some(depth))
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body);
        let response = ensure_success(self.http.send(request).await?).await?;
        let text = response.text().await.map_err(crate::errors::InfraError::from)?;
        xml::parse_multistatus(&text)
    }

    async fn principal_url(&self, account: &CalDavAccount) -> Result<Url> {
        let base = self.base_url(account)?;
        let body = xml::CURRENT_USER_PRINCIPAL.to_string();
        let resources = self.multistatus(propfind()?, base.clone(), account, "0", body).await?;
        let href = resources.into_iter().find_map(|r| r.principal_href).ok_or_else(|| {
            CalSyncError::ProviderApi("CalDAV server did not report a principal".into())
        })?;
        join(&base, &href)
    }

    async fn home_set_url(&self, account: &CalDavAccount) -> Result<Url> {
        let principal = self.principal_url(account).await?;
        let body = xml::CALENDAR_HOME_SET.to_string();
        let resources = self.multistatus(propfind()?, principal.clone(), account, "0", body).await?;
        let href = resources.into_iter().find_map(|r| r.home_set_href).ok_or_else(|| {
            CalSyncError::ProviderApi("CalDAV principal has no calendar-home-set".into())
        })?;
        join(&principal, &href)
    }

    /// Absolute URL of the resource holding `uid` in `calendar_id`, if any.
    async fn find_resource(
        &self,
        account: &CalDavAccount,
        calendar_id: &str,
        uid: &str,
    ) -> Result<Option<Url>> {
        let calendar = collection_url(calendar_id)?;
        let resources = self
            .multistatus(report()?, calendar.clone(), account, "1", xml::uid_query(uid))
            .await?;
        resources.into_iter().next().map(|r| join(&calendar, &r.href)).transpose()
    }

    async fn put_event(
        &self,
        account: &CalDavAccount,
        url: Url,
        uid: &str,
        event: &NewEventData,
        create: bool,
    ) -> Result<ExternalEvent> {
        event.validate()?;
        let body = ics::render_event(uid, event, Utc::now());
        let mut request =
            self.dav(Method::PUT, url, account, None).header(CONTENT_TYPE, ICS_CONTENT_TYPE);
        if create {
            request = request.header(IF_NONE_MATCH, "*");
        }
        ensure_success(self.http.send(request.body(body.clone())).await?).await?;

        ics::parse_events(&body, None)?.into_iter().next().ok_or_else(|| {
            CalSyncError::Internal("rendered CalDAV event could not be read back".into())
        })
    }
}

#[async_trait]
impl CalendarProviderAdapter for CalDavCalendarAdapter {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Apple
    }

    fn get_auth_url(&self, _user_id: &str, _redirect_uri: &str) -> Result<String> {
        Ok(CALDAV_MANUAL_AUTH_URL.to_string())
    }

    #[instrument(skip_all)]
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<Credentials> {
        let account = CalDavAccount::from_auth_code(code)?;
        self.principal_url(&account).await?;
        info!(username = %account.username, "CalDAV credentials accepted");
        account.into_credentials()
    }

    async fn refresh_tokens(&self, credentials: &Credentials) -> Result<Credentials> {
        Ok(credentials.clone())
    }

    #[instrument(skip_all)]
    async fn get_calendars(&self, credentials: &Credentials) -> Result<Vec<CalendarMetadata>> {
        let account = CalDavAccount::from_credentials(credentials)?;
        let home = self.home_set_url(&account).await?;
        let body = xml::CALENDAR_COLLECTIONS.to_string();
        let resources = self.multistatus(propfind()?, home.clone(), &account, "1", body).await?;

        let mut calendars = Vec::new();
        for resource in resources.into_iter().filter(|r| r.is_calendar) {
            let url = join(&home, &resource.href)?;
            let name = resource.display_name.unwrap_or_else(|| last_segment(&url));
            calendars.push(CalendarMetadata {
                is_primary: calendars.is_empty(),
                id: url.to_string(),
                name,
                timezone: resource.calendar_timezone.as_deref().and_then(ics::timezone_id),
                access_role: "owner".to_string(),
                owner: Some(account.username.clone()),
            });
        }

        debug!(count = calendars.len(), "listed CalDAV calendars");
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
        let account = CalDavAccount::from_credentials(credentials)?;
        let calendar = collection_url(calendar_id)?;
        let resources = self
            .multistatus(report()?, calendar, &account, "1", xml::calendar_query(start, end))
            .await?;

        let mut events = Vec::new();
        for resource in resources {
            let Some(data) = resource.calendar_data else {
                continue;
            };
            match ics::parse_events(&data, None) {
                Ok(parsed) => events.extend(parsed.into_iter().filter(|event| {
                    event.start.to_utc() < end && event.end.to_utc() > start
                })),
                Err(err) => {
                    warn!(href = %resource.href, error = %err, "skipping unreadable CalDAV data");
                }
            }
        }

        events.sort_by_key(|event| event.start.to_utc());
        debug!(count = events.len(), "fetched CalDAV events");
        Ok(events)
    }

    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        let account = CalDavAccount::from_credentials(credentials)?;
        let uid = Uuid::new_v4().to_string();
        let url = join(&collection_url(calendar_id)?, &format!("{uid}.ics"))?;
        self.put_event(&account, url, &uid, event, true).await
    }

    async fn update_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent> {
        let uid = series_uid(event_id)?;
        let account = CalDavAccount::from_credentials(credentials)?;
        let url = self
            .find_resource(&account, calendar_id, uid)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("CalDAV event {uid}")))?;
        self.put_event(&account, url, uid, event, false).await
    }

    async fn delete_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<()> {
        let uid = series_uid(event_id)?;
        let account = CalDavAccount::from_credentials(credentials)?;
        let Some(url) = self.find_resource(&account, calendar_id, uid).await? else {
            debug!(uid, "CalDAV event already deleted");
            return Ok(());
        };

        let response = self.http.send(self.dav(Method::DELETE, url, &account, None)).await?;
        if is_gone(response.status()) {
            debug!(uid, "CalDAV event already deleted");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn validate_tokens(&self, credentials: &Credentials) -> Result<bool> {
        let account = match CalDavAccount::from_credentials(credentials) {
            Ok(account) => account,
            Err(CalSyncError::Auth(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        match self.principal_url(&account).await {
            Ok(_) => Ok(true),
            Err(CalSyncError::Auth(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn revoke_tokens(&self, _credentials: &Credentials) -> Result<()> {
        Ok(())
    }
}

fn dav_method(name: &str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|err| CalSyncError::Internal(format!("http method {name}: {err}")))
}

fn propfind() -> Result<Method> {
    dav_method("PROPFIND")
}

fn report() -> Result<Method> {
    dav_method("REPORT")
}

fn join(base: &Url, href: &str) -> Result<Url> {
    base.join(href)
        .map_err(|err| CalSyncError::ProviderApi(format!("invalid CalDAV href {href}: {err}")))
}

/// Calendar ids are collection URLs; relative joins need the trailing slash.
fn collection_url(calendar_id: &str) -> Result<Url> {
    let raw = if calendar_id.ends_with('/') {
        calendar_id.to_string()
    } else {
        format!("{calendar_id}/")
    };
    Url::parse(&raw)
        .map_err(|err| CalSyncError::InvalidInput(format!("invalid CalDAV calendar id: {err}")))
}

fn last_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map_or_else(|| url.to_string(), str::to_string)
}

/// Expanded instances carry `uid#RECURRENCE-ID` ids. Writing through one would
/// replace the whole series resource, so only series ids are writable.
fn series_uid(event_id: &str) -> Result<&str> {
    if event_id.contains('#') {
        return Err(CalSyncError::InvalidInput(format!(
            "CalDAV recurrence instance {event_id} cannot be modified on its own"
        )));
    }
    Ok(event_id)
}
