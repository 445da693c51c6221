//! Sync orchestrator - connect, disconnect, sync and coaching-session writes

use std::sync::Arc;
use std::time::Duration;

use calsync_domain::constants::DEFAULT_SYNC_HISTORY_LIMIT;
use calsync_domain::{
    CalSyncError, CalendarEvent, CalendarIntegration, CalendarMetadata, CalendarProvider,
    IntegrationSummary, NewEventData, Result, SyncConfig, SyncCounts, SyncErrorRecord, SyncLog,
    SyncOptions, SyncResult, SyncRunState, SyncType, SyncWindow,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::diff::{plan_changes, EventChange};
use super::locks::IntegrationLocks;
use super::ports::{
    CalendarEventRepository, IntegrationFilter, IntegrationRepository, SyncLogRepository,
};
use super::registry::ProviderRegistry;
use super::vault::CredentialVault;

/// Counters and errors accumulated while a pass runs.
///
/// Lives outside the timed future so a pass cut short by the run budget
/// still reports what it got done.
#[derive(Debug, Default)]
struct PassProgress {
    counts: SyncCounts,
    errors: Vec<SyncErrorRecord>,
    unmatched_local_events: Vec<String>,
}

/// Outcome of [`SyncOrchestrator::recover_stale_runs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaleRunRecovery {
    pub logs_failed: usize,
    pub flags_released: usize,
}

/// Calendar sync orchestrator
pub struct SyncOrchestrator {
    registry: ProviderRegistry,
    vault: Arc<CredentialVault>,
    integrations: Arc<dyn IntegrationRepository>,
    events: Arc<dyn CalendarEventRepository>,
    sync_logs: Arc<dyn SyncLogRepository>,
    settings: SyncConfig,
    run_locks: IntegrationLocks,
}

impl SyncOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        vault: Arc<CredentialVault>,
        integrations: Arc<dyn IntegrationRepository>,
        events: Arc<dyn CalendarEventRepository>,
        sync_logs: Arc<dyn SyncLogRepository>,
    ) -> Self {
        Self {
            registry,
            vault,
            integrations,
            events,
            sync_logs,
            settings: SyncConfig::default(),
            run_locks: IntegrationLocks::new(),
        }
    }

    /// Override window, run budget and concurrency.
    pub fn with_settings(mut self, settings: SyncConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SyncConfig {
        &self.settings
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// URL that starts the provider's authorization flow for `user_id`.
    pub fn get_auth_url(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        redirect_uri: &str,
    ) -> Result<String> {
        require_non_empty("user_id", user_id)?;
        self.registry.get(provider)?.get_auth_url(user_id, redirect_uri)
    }

    /// Complete the authorization flow and store the integration.
    ///
    /// Without `calendar_id` the provider's primary calendar is chosen,
    /// falling back to the first one listed. Reconnecting overwrites the
    /// existing `(user_id, provider)` row and reactivates it; switching to a
    /// different calendar drops the events imported from the old one.
    #[instrument(skip(self, provider, code, redirect_uri), fields(provider = %provider))]
    pub async fn connect_calendar(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        code: &str,
        redirect_uri: &str,
        calendar_id: Option<&str>,
    ) -> Result<CalendarIntegration> {
        require_non_empty("user_id", user_id)?;
        require_non_empty("code", code)?;

        let adapter = self.registry.get(provider)?;
        let credentials = adapter.exchange_code_for_tokens(code, redirect_uri).await?;
        let calendars = adapter.get_calendars(&credentials).await?;
        let calendar = select_calendar(&calendars, calendar_id)?;

        let sealed = self.vault.seal(&credentials)?;
        let previous = self.integrations.find_by_user_provider(user_id, provider).await?;
        let now = Utc::now();

        let provider_account_id = credentials
            .account_id
            .clone()
            .or_else(|| calendar.owner.clone())
            .unwrap_or_else(|| user_id.to_string());

        let same_calendar =
            previous.as_ref().is_some_and(|existing| existing.calendar_id == calendar.id);

        let integration = CalendarIntegration {
            id: previous.as_ref().map_or_else(Uuid::now_v7, |existing| existing.id),
            user_id: user_id.to_string(),
            provider,
            provider_account_id,
            access_token: sealed.access_token,
            refresh_token: sealed.refresh_token,
            token_expiry: sealed.token_expiry,
            scope: credentials.scope.clone(),
            calendar_id: calendar.id.clone(),
            calendar_name: calendar.name.clone(),
            is_active: true,
            sync_enabled: true,
            last_sync_at: previous
                .as_ref()
                .filter(|_| same_calendar)
                .and_then(|existing| existing.last_sync_at),
            sync_errors: None,
            sync_in_progress: false,
            sync_started_at: None,
            created_at: previous.as_ref().map_or(now, |existing| existing.created_at),
            updated_at: now,
        };

        let stored = self.integrations.upsert(&integration).await?;

        if previous.is_some() && !same_calendar {
            let purged = self.events.delete_by_integration(stored.id).await?;
            debug!(integration_id = %stored.id, purged, "dropped events of previous calendar");
        }

        info!(
            integration_id = %stored.id,
            calendar_id = %stored.calendar_id,
            reconnected = previous.is_some(),
            "calendar.connected"
        );
        Ok(stored)
    }

    /// Revoke access and delete the integration with its events and logs.
    ///
    /// Revocation is best effort: any failure along the way is logged and
    /// the local delete still happens.
    #[instrument(skip(self, provider), fields(provider = %provider))]
    pub async fn disconnect_calendar(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<()> {
        let integration = self
            .integrations
            .find_by_user_provider(user_id, provider)
            .await?
            .ok_or_else(|| {
                CalSyncError::NotFound(format!("no {provider} integration for user {user_id}"))
            })?;

        if let Err(err) = self.revoke(&integration).await {
            warn!(
                integration_id = %integration.id,
                error = %err,
                "token revocation failed, deleting integration anyway"
            );
        }

        self.integrations.delete(integration.id).await?;
        info!(integration_id = %integration.id, "calendar.disconnected");
        Ok(())
    }

    /// Calendars visible to the connected account.
    #[instrument(skip(self, provider), fields(provider = %provider))]
    pub async fn get_user_calendars(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Vec<CalendarMetadata>> {
        let integration = self
            .integrations
            .find_by_user_provider(user_id, provider)
            .await?
            .ok_or_else(|| {
                CalSyncError::NotFound(format!("no {provider} integration for user {user_id}"))
            })?;

        let adapter = self.registry.get(provider)?;
        let credentials = self.vault.ensure_valid_tokens(integration.id).await?;
        adapter.get_calendars(&credentials).await
    }

    /// Run one pass for every active, sync-enabled integration matching
    /// `options`.
    ///
    /// Only a failure to list integrations is returned as an error; every
    /// per-integration problem ends up in that integration's result. Runs
    /// abandoned by a crashed process are failed first so their integrations
    /// can be claimed again.
    #[instrument(skip(self, options), fields(sync_type = %options.sync_type))]
    pub async fn sync_calendars(&self, options: SyncOptions) -> Result<Vec<SyncResult>> {
        if let Err(err) = self.recover_stale_runs(Utc::now()).await {
            warn!(error = %err, "stale run recovery failed");
        }

        let filter = IntegrationFilter {
            integration_id: options.integration_id,
            user_id: options.user_id.clone(),
            provider: options.provider,
        };
        let integrations = self.integrations.list_syncable(&filter).await?;
        let window = options.window.unwrap_or_else(|| {
            SyncWindow::around(
                Utc::now(),
                self.settings.lookback_days,
                self.settings.lookahead_days,
            )
        });

        debug!(count = integrations.len(), "starting sync passes");

        let results: Vec<SyncResult> = stream::iter(integrations)
            .map(|integration| self.sync_integration(integration, window, options.sync_type))
            .buffered(self.settings.max_concurrent_syncs.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|result| !result.success).count();
        info!(total = results.len(), failed, "sync_calendars.finished");
        Ok(results)
    }

    /// Create an event on the provider and store it linked to `session_id`.
    ///
    /// The provider write happens first; a failed create leaves no local
    /// row. If the local write fails afterwards the provider event is
    /// deleted again.
    #[instrument(skip(self, event_data))]
    pub async fn create_coaching_session_event(
        &self,
        session_id: &str,
        integration_id: Uuid,
        event_data: &NewEventData,
    ) -> Result<CalendarEvent> {
        require_non_empty("session_id", session_id)?;
        event_data.validate()?;

        let integration = self.active_integration(integration_id).await?;
        let adapter = self.registry.get(integration.provider)?;
        let credentials = self.vault.ensure_valid_tokens(integration_id).await?;

        if !adapter.validate_tokens(&credentials).await? {
            return Err(CalSyncError::Auth(format!(
                "{} rejected the stored credentials",
                integration.provider
            )));
        }

        let created =
            adapter.create_event(&credentials, &integration.calendar_id, event_data).await?;
        let event =
            CalendarEvent::coaching_session(integration_id, session_id, &created, Utc::now());

        if let Err(err) = self.events.save_linked(&event).await {
            error!(
                integration_id = %integration_id,
                provider_event_id = %created.provider_event_id,
                error = %err,
                "failed to store coaching session event, removing it from the provider"
            );
            if let Err(cleanup) = adapter
                .delete_event(&credentials, &integration.calendar_id, &created.provider_event_id)
                .await
            {
                error!(
                    provider_event_id = %created.provider_event_id,
                    error = %cleanup,
                    "compensating provider delete failed"
                );
            }
            return Err(err);
        }

        info!(
            integration_id = %integration_id,
            provider_event_id = %event.provider_event_id,
            "coaching_event.created"
        );
        Ok(event)
    }

    /// Push new details of a linked event to the provider, then store them.
    #[instrument(skip(self, event_data))]
    pub async fn update_coaching_session_event(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
        event_data: &NewEventData,
    ) -> Result<CalendarEvent> {
        event_data.validate()?;

        let integration = self.active_integration(integration_id).await?;
        let mut event = self.stored_event(integration_id, provider_event_id).await?;
        let adapter = self.registry.get(integration.provider)?;
        let credentials = self.vault.ensure_valid_tokens(integration_id).await?;

        let updated = adapter
            .update_event(&credentials, &integration.calendar_id, provider_event_id, event_data)
            .await?;

        event.apply_external(&updated, Utc::now());
        self.events.save_linked(&event).await?;

        info!(integration_id = %integration_id, provider_event_id, "coaching_event.updated");
        Ok(event)
    }

    /// Delete a linked event from the provider, then locally.
    #[instrument(skip(self))]
    pub async fn delete_coaching_session_event(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
    ) -> Result<()> {
        let integration = self.active_integration(integration_id).await?;
        self.stored_event(integration_id, provider_event_id).await?;
        let adapter = self.registry.get(integration.provider)?;
        let credentials = self.vault.ensure_valid_tokens(integration_id).await?;

        adapter.delete_event(&credentials, &integration.calendar_id, provider_event_id).await?;
        self.events.delete(integration_id, provider_event_id).await?;

        info!(integration_id = %integration_id, provider_event_id, "coaching_event.deleted");
        Ok(())
    }

    /// Recent sync runs of one integration, newest first.
    pub async fn get_sync_history(
        &self,
        integration_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<SyncLog>> {
        self.sync_logs
            .list_for_integration(integration_id, limit.unwrap_or(DEFAULT_SYNC_HISTORY_LIMIT))
            .await
    }

    /// Include or exclude a user's integration from `sync_calendars`.
    #[instrument(skip(self, provider), fields(provider = %provider))]
    pub async fn set_sync_enabled(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        enabled: bool,
    ) -> Result<()> {
        let integration =
            self.integrations.find_by_user_provider(user_id, provider).await?.ok_or_else(|| {
                CalSyncError::NotFound(format!("no {provider} integration for user {user_id}"))
            })?;
        self.integrations.set_sync_enabled(integration.id, enabled).await?;
        info!(integration_id = %integration.id, enabled, "integration.sync_toggled");
        Ok(())
    }

    /// Integrations of a user, without token material.
    pub async fn list_integrations(&self, user_id: &str) -> Result<Vec<IntegrationSummary>> {
        let integrations = self.integrations.list_by_user(user_id).await?;
        Ok(integrations.iter().map(IntegrationSummary::from).collect())
    }

    /// Canonical events of an integration starting inside `[start, end)`.
    pub async fn list_events(
        &self,
        integration_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        if end < start {
            return Err(CalSyncError::InvalidInput("window ends before it starts".into()));
        }
        self.events.list_in_window(integration_id, start, end).await
    }

    /// Fail runs and release in-progress flags left behind by a process that
    /// died mid-run. Anything started more than one run budget before `now`
    /// counts as stale.
    #[instrument(skip(self))]
    pub async fn recover_stale_runs(&self, now: DateTime<Utc>) -> Result<StaleRunRecovery> {
        let budget = chrono::Duration::from_std(self.run_timeout())
            .map_err(|e| CalSyncError::Config(format!("run timeout out of range: {e}")))?;
        let cutoff = now - budget;

        let logs_failed = self.sync_logs.fail_stale(cutoff, now).await?;
        let flags_released = self.integrations.release_stale_sync_flags(cutoff).await?;

        if logs_failed > 0 || flags_released > 0 {
            warn!(logs_failed, flags_released, "recovered stale sync runs");
        }
        Ok(StaleRunRecovery { logs_failed, flags_released })
    }

    fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.run_timeout_secs)
    }

    async fn sync_integration(
        &self,
        integration: CalendarIntegration,
        window: SyncWindow,
        sync_type: SyncType,
    ) -> SyncResult {
        let integration_id = integration.id;
        let provider = integration.provider;

        let Some(_run_guard) = self.run_locks.try_lock(integration_id) else {
            return reject_busy(integration_id, provider);
        };

        let started_at = Utc::now();
        match self.integrations.try_begin_sync(integration_id, started_at).await {
            Ok(true) => {}
            Ok(false) => return reject_busy(integration_id, provider),
            Err(err) => {
                warn!(integration_id = %integration_id, error = %err, "could not claim sync flag");
                return SyncResult::rejected(integration_id, provider, &err);
            }
        }

        let mut log = SyncLog::start(integration_id, sync_type, started_at);
        if let Err(err) = self.sync_logs.insert(&log).await {
            error!(integration_id = %integration_id, error = %err, "could not open sync log");
            self.release_flag(integration_id, false, vec![SyncErrorRecord::for_run(&err)]).await;
            return SyncResult::rejected(integration_id, provider, &err);
        }

        let mut progress = PassProgress::default();
        let outcome = tokio::time::timeout(
            self.run_timeout(),
            self.execute_pass(&integration, window, &mut log, &mut progress),
        )
        .await;

        let run_error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(CalSyncError::Timeout(format!(
                "sync run exceeded {}s",
                self.settings.run_timeout_secs
            ))),
        };

        let finished_at = Utc::now();
        let completed = run_error.is_none();
        if let Some(err) = &run_error {
            progress.errors.push(SyncErrorRecord::for_run(err));
            log.fail(progress.counts, progress.errors.clone(), finished_at);
        } else {
            log.complete(progress.counts, progress.errors.clone(), finished_at);
        }

        if let Err(err) = self.sync_logs.finalize(&log).await {
            error!(run_id = %log.id, error = %err, "could not finalize sync log");
        }
        self.release_flag(integration_id, completed, progress.errors.clone()).await;

        let success = completed && progress.errors.is_empty();
        let counts = progress.counts;
        if success {
            info!(
                integration_id = %integration_id,
                run_id = %log.id,
                processed = counts.events_processed,
                created = counts.events_created,
                updated = counts.events_updated,
                deleted = counts.events_deleted,
                "sync_run.completed"
            );
        } else {
            warn!(
                integration_id = %integration_id,
                run_id = %log.id,
                status = %log.status,
                errors = progress.errors.len(),
                "sync_run.finished_with_errors"
            );
        }

        SyncResult {
            integration_id,
            provider,
            success,
            counts,
            errors: progress.errors,
            unmatched_local_events: progress.unmatched_local_events,
            sync_log_id: Some(log.id),
        }
    }

    async fn execute_pass(
        &self,
        integration: &CalendarIntegration,
        window: SyncWindow,
        log: &mut SyncLog,
        progress: &mut PassProgress,
    ) -> Result<()> {
        let adapter = self.registry.get(integration.provider)?;
        let credentials = self.vault.ensure_valid_tokens(integration.id).await?;

        self.transition(log, SyncRunState::FetchingExternal).await?;
        let external = adapter
            .get_events(&credentials, &integration.calendar_id, window.start, window.end)
            .await?;

        self.transition(log, SyncRunState::Diffing).await?;
        let ids: Vec<String> = external.iter().map(|e| e.provider_event_id.clone()).collect();
        let existing = self.events.find_by_provider_event_ids(integration.id, &ids).await?;
        let local = self.events.list_in_window(integration.id, window.start, window.end).await?;

        let plan = plan_changes(integration.id, &external, existing, &local, Utc::now());
        progress.counts.events_processed = plan.events_processed;
        progress.unmatched_local_events = plan.unmatched_local_events;

        for change in &plan.changes {
            match self.events.upsert_from_provider(change.event()).await {
                Ok(()) => match change {
                    EventChange::Create(_) => progress.counts.events_created += 1,
                    EventChange::Update(_) => progress.counts.events_updated += 1,
                    EventChange::Cancel(_) => progress.counts.events_deleted += 1,
                },
                Err(err) => {
                    warn!(
                        integration_id = %integration.id,
                        provider_event_id = %change.provider_event_id(),
                        error = %err,
                        "failed to store provider event"
                    );
                    progress
                        .errors
                        .push(SyncErrorRecord::for_event(change.provider_event_id(), &err));
                }
            }
        }

        Ok(())
    }

    async fn transition(&self, log: &mut SyncLog, next: SyncRunState) -> Result<()> {
        if !log.advance(next) {
            return Err(CalSyncError::Internal(format!(
                "invalid sync state transition {} -> {next}",
                log.state
            )));
        }
        self.sync_logs.update_state(log.id, next).await
    }

    async fn release_flag(
        &self,
        integration_id: Uuid,
        completed: bool,
        errors: Vec<SyncErrorRecord>,
    ) {
        let errors = if errors.is_empty() { None } else { Some(errors) };
        if let Err(err) =
            self.integrations.finish_sync(integration_id, Utc::now(), completed, errors).await
        {
            error!(integration_id = %integration_id, error = %err, "could not release sync flag");
        }
    }

    async fn revoke(&self, integration: &CalendarIntegration) -> Result<()> {
        let adapter = self.registry.get(integration.provider)?;
        let credentials = self.vault.decrypt_credentials(integration)?;
        adapter.revoke_tokens(&credentials).await
    }

    async fn integration(&self, integration_id: Uuid) -> Result<CalendarIntegration> {
        self.integrations
            .find_by_id(integration_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("integration {integration_id}")))
    }

    async fn active_integration(&self, integration_id: Uuid) -> Result<CalendarIntegration> {
        let integration = self.integration(integration_id).await?;
        if !integration.is_active {
            return Err(CalSyncError::InvalidInput(format!(
                "integration {integration_id} is not active"
            )));
        }
        Ok(integration)
    }

    async fn stored_event(
        &self,
        integration_id: Uuid,
        provider_event_id: &str,
    ) -> Result<CalendarEvent> {
        self.events
            .find_by_provider_event_id(integration_id, provider_event_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("event {provider_event_id}")))
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Pick the calendar to sync from what the provider listed.
fn select_calendar<'a>(
    calendars: &'a [CalendarMetadata],
    requested: Option<&str>,
) -> Result<&'a CalendarMetadata> {
    if calendars.is_empty() {
        return Err(CalSyncError::NoCalendarsFound(
            "the connected account has no calendars".into(),
        ));
    }

    match requested {
        Some(id) => calendars
            .iter()
            .find(|calendar| calendar.id == id)
            .ok_or_else(|| CalSyncError::NotFound(format!("calendar {id}"))),
        None => Ok(calendars.iter().find(|calendar| calendar.is_primary).unwrap_or(&calendars[0])),
    }
}

fn reject_busy(integration_id: Uuid, provider: CalendarProvider) -> SyncResult {
    debug!(integration_id = %integration_id, "sync already running, skipping");
    SyncResult::rejected(
        integration_id,
        provider,
        &CalSyncError::SyncInProgress(format!("integration {integration_id}")),
    )
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CalSyncError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}
