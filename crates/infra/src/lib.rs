//! # CalSync Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - SQLite repositories for integrations, canonical events and sync logs
//! - The retrying HTTP client
//! - Calendar provider adapters (Google, Microsoft Graph, CalDAV)
//! - Configuration loading, logging setup and engine bootstrap
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Depends on `calsync-common`, `calsync-domain` and `calsync-core`
//! - Contains all "impure" code (I/O, network, filesystem)

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod observability;

// Re-export commonly used items
pub use bootstrap::CalSyncEngine;
pub use database::{
    DbManager, SqliteCalendarEventRepository, SqliteIntegrationRepository,
    SqliteSyncLogRepository,
};
pub use errors::InfraError;
pub use http::HttpClient;
pub use integrations::calendar::{
    build_registry, CalDavCalendarAdapter, GoogleCalendarAdapter, MicrosoftCalendarAdapter,
};
pub use observability::init_tracing;
