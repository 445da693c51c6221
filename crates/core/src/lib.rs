//! # CalSync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for providers, storage and encryption
//! - The credential vault and the sync orchestrator
//! - The diff that reconciles provider snapshots with the canonical store
//!
//! ## Architecture Principles
//! - Only depends on `calsync-common` and `calsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod calendar;

pub use calendar::{
    CalendarEventRepository, CalendarProviderAdapter, CredentialVault, IntegrationFilter,
    IntegrationRepository, ProviderRegistry, SecretCipher, SyncLogRepository, SyncOrchestrator,
};
