//! Calendar integration and synchronization
//!
//! - [`ports`]: provider adapter, repository and cipher traits
//! - [`registry`]: provider → adapter map injected at startup
//! - [`vault`]: token encryption and serialized refresh
//! - [`diff`]: reconciliation of a provider snapshot with stored rows
//! - [`service`]: the orchestrator exposing the public operations

pub mod diff;
pub mod locks;
pub mod ports;
pub mod registry;
pub mod service;
pub mod vault;

pub use diff::{plan_changes, EventChange, SyncPlan};
pub use locks::IntegrationLocks;
pub use ports::{
    CalendarEventRepository, CalendarProviderAdapter, IntegrationFilter, IntegrationRepository,
    SecretCipher, SyncLogRepository,
};
pub use registry::ProviderRegistry;
pub use service::{StaleRunRecovery, SyncOrchestrator};
pub use vault::CredentialVault;
