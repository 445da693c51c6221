//! Credential vault: encryption at rest and serialized token refresh

use std::sync::Arc;

use calsync_common::{EncryptedData, EncryptionService};
use calsync_domain::constants::TOKEN_REFRESH_BUFFER_SECS;
use calsync_domain::{
    CalSyncError, CalendarIntegration, Credentials, EncryptedSecret, Result, TokenUpdate,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::IntegrationLocks;
use super::ports::{IntegrationRepository, SecretCipher};
use super::registry::ProviderRegistry;

impl SecretCipher for EncryptionService {
    fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret> {
        let sealed = EncryptionService::encrypt(self, plaintext.as_bytes())
            .map_err(|e| CalSyncError::Encryption(e.to_string()))?;
        let (ciphertext, iv) = sealed.to_base64();
        Ok(EncryptedSecret { ciphertext, iv })
    }

    fn decrypt(&self, secret: &EncryptedSecret) -> Result<String> {
        let sealed = EncryptedData::from_base64(&secret.ciphertext, &secret.iv)
            .map_err(|e| CalSyncError::Decryption(e.to_string()))?;
        let plaintext = EncryptionService::decrypt(self, &sealed)
            .map_err(|e| CalSyncError::Decryption(e.to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| CalSyncError::Decryption(format!("plaintext is not UTF-8: {e}")))
    }
}

/// Owns token material for every integration.
///
/// Plaintext tokens never leave the vault except as short-lived
/// [`Credentials`] handed to an adapter for one operation. Refreshes for the
/// same integration are serialized so concurrent callers trigger exactly one
/// provider refresh.
pub struct CredentialVault {
    cipher: Arc<dyn SecretCipher>,
    integrations: Arc<dyn IntegrationRepository>,
    registry: ProviderRegistry,
    refresh_locks: IntegrationLocks,
    refresh_buffer_secs: i64,
}

impl CredentialVault {
    pub fn new(
        cipher: Arc<dyn SecretCipher>,
        integrations: Arc<dyn IntegrationRepository>,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            cipher,
            integrations,
            registry,
            refresh_locks: IntegrationLocks::new(),
            refresh_buffer_secs: TOKEN_REFRESH_BUFFER_SECS,
        }
    }

    pub fn with_refresh_buffer(mut self, secs: i64) -> Self {
        self.refresh_buffer_secs = secs;
        self
    }

    /// Encrypt credentials for storage.
    pub fn seal(&self, credentials: &Credentials) -> Result<TokenUpdate> {
        let access_token = self.cipher.encrypt(&credentials.access_token)?;
        let refresh_token =
            credentials.refresh_token.as_deref().map(|t| self.cipher.encrypt(t)).transpose()?;
        Ok(TokenUpdate { access_token, refresh_token, token_expiry: credentials.expires_at })
    }

    /// Decrypt the stored credentials of an integration without refreshing.
    pub fn decrypt_credentials(&self, integration: &CalendarIntegration) -> Result<Credentials> {
        let access_token = self.cipher.decrypt(&integration.access_token)?;
        let refresh_token =
            integration.refresh_token.as_ref().map(|t| self.cipher.decrypt(t)).transpose()?;
        Ok(Credentials {
            access_token,
            refresh_token,
            expires_at: integration.token_expiry,
            scope: integration.scope.clone(),
            account_id: Some(integration.provider_account_id.clone()),
        })
    }

    /// Return credentials valid for at least the refresh buffer, refreshing
    /// and persisting new tokens first when needed.
    ///
    /// # Errors
    /// - `NotFound` if the integration no longer exists
    /// - `Decryption` if the stored tokens cannot be opened
    /// - `TokenExpired` if the token is past expiry and no refresh token is
    ///   stored; the row is left unchanged
    /// - whatever the provider refresh returns (typically `Auth`)
    pub async fn ensure_valid_tokens(&self, integration_id: Uuid) -> Result<Credentials> {
        let _guard = self.refresh_locks.lock(integration_id).await;

        // Re-read under the lock so a refresh finished by another caller is
        // picked up instead of repeated.
        let integration = self
            .integrations
            .find_by_id(integration_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("integration {integration_id}")))?;

        let credentials = self.decrypt_credentials(&integration)?;
        let now = Utc::now();

        if !credentials.expires_within(self.refresh_buffer_secs, now) {
            return Ok(credentials);
        }

        let expired = credentials.expires_within(0, now);
        if credentials.refresh_token.is_none() {
            if expired {
                warn!(
                    integration_id = %integration_id,
                    provider = %integration.provider,
                    "access token expired and no refresh token is stored"
                );
                return Err(CalSyncError::TokenExpired(format!(
                    "integration {integration_id} must be reconnected"
                )));
            }
            debug!(integration_id = %integration_id, "token near expiry, nothing to refresh with");
            return Ok(credentials);
        }

        let adapter = self.registry.get(integration.provider)?;
        let mut refreshed = adapter.refresh_tokens(&credentials).await?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = credentials.refresh_token.clone();
        }
        if refreshed.account_id.is_none() {
            refreshed.account_id = credentials.account_id.clone();
        }
        if refreshed.scope.is_none() {
            refreshed.scope = credentials.scope.clone();
        }

        let update = self.seal(&refreshed)?;
        self.integrations.update_tokens(integration_id, &update).await?;

        info!(
            integration_id = %integration_id,
            provider = %integration.provider,
            expires_at = ?refreshed.expires_at,
            "refreshed provider tokens"
        );
        Ok(refreshed)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("registry", &self.registry)
            .field("refresh_buffer_secs", &self.refresh_buffer_secs)
            .finish_non_exhaustive()
    }
}
