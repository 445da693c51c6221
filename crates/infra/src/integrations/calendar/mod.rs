//! Calendar provider integrations
//!
//! Adapters implementing `CalendarProviderAdapter` for:
//! - Google Calendar (OAuth2, Calendar API v3)
//! - Microsoft Calendar (OAuth2, Graph v1.0)
//! - Apple iCloud and other CalDAV servers (app-specific passwords)

pub mod oauth;
pub mod providers;

use calsync_domain::Result;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

pub use oauth::{extract_email_from_id_token, OAuthClient, OAuthSettings, TokenResponse};
pub use providers::{
    build_registry, CalDavCalendarAdapter, GoogleCalendarAdapter, MicrosoftCalendarAdapter,
};

use crate::errors::{status_error, InfraError};

/// Pass successful responses through; map anything else onto the domain
/// error for its status.
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(status_error(status, &detail))
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await.map_err(InfraError::from)?)
}

/// Resource already deleted on the provider side.
pub(crate) fn is_gone(status: StatusCode) -> bool {
    matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
}
