//! Calendar integration records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provider::CalendarProvider;
use super::sync::SyncErrorRecord;

/// AES-256-GCM ciphertext stored together with its nonce, both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub iv: String,
}

/// Link between a user account and one external calendar.
///
/// Unique per `(user_id, provider)`; reconnecting overwrites the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub id: Uuid,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub provider_account_id: String,
    pub access_token: EncryptedSecret,
    pub refresh_token: Option<EncryptedSecret>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub calendar_id: String,
    pub calendar_name: String,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_errors: Option<Vec<SyncErrorRecord>>,
    pub sync_in_progress: bool,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Freshly encrypted token material written back after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: EncryptedSecret,
    pub refresh_token: Option<EncryptedSecret>,
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Integration view without any secret material, for UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSummary {
    pub id: Uuid,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub provider_account_id: String,
    pub calendar_id: String,
    pub calendar_name: String,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_errors: Option<Vec<SyncErrorRecord>>,
}

impl From<&CalendarIntegration> for IntegrationSummary {
    fn from(integration: &CalendarIntegration) -> Self {
        Self {
            id: integration.id,
            user_id: integration.user_id.clone(),
            provider: integration.provider,
            provider_account_id: integration.provider_account_id.clone(),
            calendar_id: integration.calendar_id.clone(),
            calendar_name: integration.calendar_name.clone(),
            is_active: integration.is_active,
            sync_enabled: integration.sync_enabled,
            last_sync_at: integration.last_sync_at,
            sync_errors: integration.sync_errors.clone(),
        }
    }
}
