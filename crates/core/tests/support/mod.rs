//! Shared test helpers for `calsync-core` integration tests.
//!
//! These helpers provide an in-memory store, a scriptable provider adapter
//! and a harness that wires them into a real vault and orchestrator, so the
//! scenario tests can focus on behaviour instead of boilerplate.
#![allow(dead_code)]

pub mod provider;
pub mod store;

use std::sync::Arc;

use calsync_common::EncryptionService;
use calsync_core::{CredentialVault, ProviderRegistry, SecretCipher, SyncOrchestrator};
use calsync_domain::{CalendarIntegration, CalendarProvider, Credentials, SyncConfig};
use chrono::{Duration, Utc};
use uuid::Uuid;

pub use provider::FakeProvider;
pub use store::InMemoryStore;

/// Credentials valid for another hour, with a refresh token.
pub fn fresh_credentials(access_token: &str) -> Credentials {
    let mut credentials = Credentials::new(access_token);
    credentials.refresh_token = Some("1//refresh".into());
    credentials.expires_at = Some(Utc::now() + Duration::hours(1));
    credentials
}

/// Orchestrator wired to in-memory collaborators and a real cipher.
pub struct Harness {
    pub store: InMemoryStore,
    pub provider: FakeProvider,
    pub cipher: Arc<EncryptionService>,
    pub vault: Arc<CredentialVault>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncConfig::default())
    }

    pub fn with_settings(settings: SyncConfig) -> Self {
        let store = InMemoryStore::new();
        let provider = FakeProvider::new(CalendarProvider::Google);
        let registry = ProviderRegistry::new().with_adapter(Arc::new(provider.clone()));
        let cipher = Arc::new(
            EncryptionService::new(EncryptionService::generate_key()).expect("valid key"),
        );

        let vault = Arc::new(CredentialVault::new(
            cipher.clone(),
            store.integrations(),
            registry.clone(),
        ));
        let orchestrator = SyncOrchestrator::new(
            registry,
            vault.clone(),
            store.integrations(),
            store.events(),
            store.sync_logs(),
        )
        .with_settings(settings);

        Self { store, provider, cipher, vault, orchestrator }
    }

    /// Store an active Google integration for `user_id` holding
    /// `credentials`, encrypted with the harness cipher.
    pub fn seed_integration(
        &self,
        user_id: &str,
        calendar_id: &str,
        credentials: &Credentials,
    ) -> CalendarIntegration {
        let sealed = self.vault.seal(credentials).expect("seal credentials");
        let now = Utc::now();
        let integration = CalendarIntegration {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            provider: CalendarProvider::Google,
            provider_account_id: format!("{user_id}@example.com"),
            access_token: sealed.access_token,
            refresh_token: sealed.refresh_token,
            token_expiry: sealed.token_expiry,
            scope: credentials.scope.clone(),
            calendar_id: calendar_id.into(),
            calendar_name: format!("Calendar {calendar_id}"),
            is_active: true,
            sync_enabled: true,
            last_sync_at: None,
            sync_errors: None,
            sync_in_progress: false,
            sync_started_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.with_state(|s| s.integrations.push(integration.clone()));
        integration
    }

    /// Plaintext access token currently stored for `integration_id`.
    pub fn stored_access_token(&self, integration_id: Uuid) -> String {
        let integration = self.store.integration(integration_id).expect("integration exists");
        SecretCipher::decrypt(self.cipher.as_ref(), &integration.access_token)
            .expect("decrypt access token")
    }
}
