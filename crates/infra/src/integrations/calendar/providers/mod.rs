//! Calendar provider adapters
//!
//! One `CalendarProviderAdapter` implementation per provider, plus the
//! registry wiring for whichever providers are configured.

pub mod caldav;
pub mod google;
pub mod microsoft;

use std::sync::Arc;

use calsync_core::ProviderRegistry;
use calsync_domain::ProvidersConfig;
use tracing::{info, warn};

pub use caldav::CalDavCalendarAdapter;
pub use google::GoogleCalendarAdapter;
pub use microsoft::MicrosoftCalendarAdapter;

use crate::http::HttpClient;

/// Register an adapter for every provider present in `config`.
pub fn build_registry(config: &ProvidersConfig, http: &HttpClient) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if let Some(google) = &config.google {
        registry.register(Arc::new(GoogleCalendarAdapter::new(google, http.clone())));
    }
    if let Some(microsoft) = &config.microsoft {
        registry.register(Arc::new(MicrosoftCalendarAdapter::new(microsoft, http.clone())));
    }
    if let Some(apple) = &config.apple {
        registry.register(Arc::new(CalDavCalendarAdapter::new(apple, http.clone())));
    }

    info!(providers = ?registry.providers(), "calendar providers registered");
    registry
}

/// Validate an attendee email and log malformed ones.
///
/// Returns None only for empty emails. Emails without `@` are logged but kept;
/// provider data is canonical.
pub(crate) fn validate_and_log_email(email: &str, event_id: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        warn!(event_id, "empty attendee email");
        return None;
    }
    if !trimmed.contains('@') {
        warn!(event_id, email = trimmed, "attendee email missing @ symbol");
    }
    Some(trimmed.to_string())
}
