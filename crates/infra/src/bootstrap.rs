//! Engine bootstrap - wires storage, crypto, HTTP and adapters together

use std::sync::Arc;

use calsync_common::EncryptionService;
use calsync_core::{
    CalendarEventRepository, CredentialVault, IntegrationRepository, ProviderRegistry,
    SecretCipher, SyncLogRepository, SyncOrchestrator,
};
use calsync_domain::{CalSyncError, Config, Result};
use tracing::info;

use crate::database::{
    DbManager, SqliteCalendarEventRepository, SqliteIntegrationRepository,
    SqliteSyncLogRepository,
};
use crate::http::HttpClient;
use crate::integrations::calendar::build_registry;

/// Fully wired calendar sync engine.
pub struct CalSyncEngine {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub registry: ProviderRegistry,
    pub vault: Arc<CredentialVault>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub integrations: Arc<dyn IntegrationRepository>,
    pub events: Arc<dyn CalendarEventRepository>,
    pub sync_logs: Arc<dyn SyncLogRepository>,
}

impl CalSyncEngine {
    /// Validate `config`, open and migrate the database, and build every
    /// configured provider adapter.
    ///
    /// # Errors
    /// - `CalSyncError::Config` for incomplete configuration
    /// - `CalSyncError::Encryption` when the key does not decode to 32 bytes
    /// - `CalSyncError::Database` when the database cannot be opened or
    ///   migrated
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let key = config
            .encryption
            .key
            .as_deref()
            .ok_or_else(|| CalSyncError::Config("encryption key is not configured".into()))?;
        let cipher: Arc<dyn SecretCipher> = Arc::new(
            EncryptionService::from_encoded_key(key)
                .map_err(|e| CalSyncError::Encryption(e.to_string()))?,
        );

        let db = Arc::new(DbManager::from_config(&config.database)?);
        db.run_migrations()?;
        let pool = Arc::clone(db.pool());

        let integrations: Arc<dyn IntegrationRepository> =
            Arc::new(SqliteIntegrationRepository::new(Arc::clone(&pool)));
        let events: Arc<dyn CalendarEventRepository> =
            Arc::new(SqliteCalendarEventRepository::new(Arc::clone(&pool)));
        let sync_logs: Arc<dyn SyncLogRepository> = Arc::new(SqliteSyncLogRepository::new(pool));

        let http = HttpClient::from_config(&config.http)?;
        let registry = build_registry(&config.providers, &http);

        let vault =
            Arc::new(CredentialVault::new(cipher, Arc::clone(&integrations), registry.clone()));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                registry.clone(),
                Arc::clone(&vault),
                Arc::clone(&integrations),
                Arc::clone(&events),
                Arc::clone(&sync_logs),
            )
            .with_settings(config.sync.clone()),
        );

        info!(
            db_path = %db.path().display(),
            providers = ?registry.providers(),
            "calendar sync engine ready"
        );

        Ok(Self {
            config: config.clone(),
            db,
            registry,
            vault,
            orchestrator,
            integrations,
            events,
            sync_logs,
        })
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Database connectivity check.
    pub fn health_check(&self) -> Result<()> {
        self.db.health_check()
    }
}

impl std::fmt::Debug for CalSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalSyncEngine")
            .field("db_path", &self.db.path())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
