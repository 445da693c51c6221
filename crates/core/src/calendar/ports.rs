//! Port interfaces for calendar integration
//!
//! These traits define the boundaries between the sync engine's business
//! logic and its infrastructure: provider wire protocols, persistence and
//! secret encryption.

use async_trait::async_trait;
use calsync_domain::{
    CalendarEvent, CalendarIntegration, CalendarMetadata, CalendarProvider, Credentials,
    EncryptedSecret, ExternalEvent, NewEventData, Result, SyncErrorRecord, SyncLog, SyncRunState,
    TokenUpdate,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Uniform capability set implemented once per provider.
///
/// Implementations own every provider-specific detail: OAuth endpoints or
/// CalDAV discovery, payload shapes, pagination and status mapping.
#[async_trait]
pub trait CalendarProviderAdapter: Send + Sync {
    /// Provider this adapter talks to.
    fn provider(&self) -> CalendarProvider;

    /// URL the user visits to grant access; `user_id` travels as `state`.
    fn get_auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<String>;

    /// Turn an authorization code (or CalDAV credential bundle) into
    /// credentials.
    async fn exchange_code_for_tokens(&self, code: &str, redirect_uri: &str)
        -> Result<Credentials>;

    /// Obtain fresh credentials using the refresh token carried by
    /// `credentials`.
    async fn refresh_tokens(&self, credentials: &Credentials) -> Result<Credentials>;

    async fn get_calendars(&self, credentials: &Credentials) -> Result<Vec<CalendarMetadata>>;

    /// Events overlapping `[start, end)`, recurring instances expanded,
    /// sorted by start, every page fetched. Cancelled events are included.
    async fn get_events(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>>;

    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent>;

    async fn update_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
        event: &NewEventData,
    ) -> Result<ExternalEvent>;

    async fn delete_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<()>;

    /// Cheap read that tells whether the provider still accepts the
    /// credentials.
    async fn validate_tokens(&self, credentials: &Credentials) -> Result<bool>;

    /// Best-effort revocation.
    async fn revoke_tokens(&self, credentials: &Credentials) -> Result<()>;
}

/// Symmetric encryption of individual secrets.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret>;
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<String>;
}

/// Optional filters for selecting integrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationFilter {
    pub integration_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub provider: Option<CalendarProvider>,
}

/// Persistence for calendar integrations.
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    /// Insert or overwrite the row for `(user_id, provider)` and return what
    /// was stored. An existing row keeps its id and creation time.
    async fn upsert(&self, integration: &CalendarIntegration) -> Result<CalendarIntegration>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CalendarIntegration>>;

    async fn find_by_user_provider(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CalendarIntegration>>;

    /// Active, sync-enabled integrations matching `filter`.
    async fn list_syncable(&self, filter: &IntegrationFilter) -> Result<Vec<CalendarIntegration>>;

    /// Replace token material and expiry in a single write.
    async fn update_tokens(&self, id: Uuid, update: &TokenUpdate) -> Result<()>;

    async fn set_sync_enabled(&self, id: Uuid, enabled: bool) -> Result<()>;

    /// Atomically set the in-progress flag. Returns false when another run
    /// already holds it.
    async fn try_begin_sync(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Clear the in-progress flag and record the run outcome. `last_sync_at`
    /// only moves forward when `completed` is true.
    async fn finish_sync(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        completed: bool,
        errors: Option<Vec<SyncErrorRecord>>,
    ) -> Result<()>;

    /// Clear in-progress flags set before `started_before`.
    async fn release_stale_sync_flags(&self, started_before: DateTime<Utc>) -> Result<usize>;

    /// Delete the integration together with its events and sync logs.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Persistence for canonical events.
#[async_trait]
pub trait CalendarEventRepository: Send + Sync {
    async fn find_by_provider_event_id(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<CalendarEvent>>;

    async fn find_by_provider_event_ids(
        &self,
        integration_id: Uuid,
        provider_event_ids: &[String],
    ) -> Result<Vec<CalendarEvent>>;

    /// Events whose start falls inside `[start, end)`.
    async fn list_in_window(
        &self,
        integration_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    /// Idempotent upsert keyed by `(integration_id, provider_event_id)`.
    /// On conflict only provider-owned fields change; `session_id`,
    /// `is_coaching_session` and `is_blocked` keep their stored values.
    async fn upsert_from_provider(&self, event: &CalendarEvent) -> Result<()>;

    /// Upsert that also writes the session linkage fields.
    async fn save_linked(&self, event: &CalendarEvent) -> Result<()>;

    async fn delete(&self, integration_id: Uuid, provider_event_id: &str) -> Result<bool>;

    async fn delete_by_integration(&self, integration_id: Uuid) -> Result<usize>;
}

/// Append-only audit trail of sync runs.
#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    async fn insert(&self, log: &SyncLog) -> Result<()>;

    async fn update_state(&self, id: Uuid, state: SyncRunState) -> Result<()>;

    /// Write the terminal status, counts and errors. Only a row still in
    /// `started` status is finalized.
    async fn finalize(&self, log: &SyncLog) -> Result<()>;

    /// Most recent runs first.
    async fn list_for_integration(&self, integration_id: Uuid, limit: usize)
        -> Result<Vec<SyncLog>>;

    /// Mark runs still `started` before `started_before` as failed.
    async fn fail_stale(&self, started_before: DateTime<Utc>, now: DateTime<Utc>)
        -> Result<usize>;
}
