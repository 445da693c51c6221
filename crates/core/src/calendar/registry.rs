//! Adapter registry keyed by provider

use std::collections::HashMap;
use std::sync::Arc;

use calsync_domain::{CalSyncError, CalendarProvider, Result};

use super::ports::CalendarProviderAdapter;

/// Explicit provider → adapter map, built once at startup and handed to the
/// services that need it.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<CalendarProvider, Arc<dyn CalendarProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the provider it reports, replacing any
    /// previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn CalendarProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn CalendarProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// # Errors
    /// Returns `CalSyncError::Config` when no adapter is registered for
    /// `provider`.
    pub fn get(&self, provider: CalendarProvider) -> Result<Arc<dyn CalendarProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            CalSyncError::Config(format!("calendar provider '{provider}' is not configured"))
        })
    }

    pub fn contains(&self, provider: CalendarProvider) -> bool {
        self.adapters.contains_key(&provider)
    }

    pub fn providers(&self) -> Vec<CalendarProvider> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort_by_key(CalendarProvider::as_str);
        providers
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.providers()).finish()
    }
}
