//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for CalSync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CalSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Rejected authorization code, redirect mismatch or credentials refused
    /// by the provider.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Access token expired and no refresh token is available.
    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Upstream rate limit, permission or payload problem.
    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error("No calendars found: {0}")]
    NoCalendarsFound(String),

    #[error("Sync already in progress: {0}")]
    SyncInProgress(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CalSyncError {
    /// Whether repeating the same call may succeed without intervention.
    ///
    /// Authentication and vault failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Stable label suitable for logs and sync error records.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::TokenExpired(_) => "token_expired",
            Self::Encryption(_) => "encryption",
            Self::Decryption(_) => "decryption",
            Self::ProviderApi(_) => "provider_api",
            Self::NoCalendarsFound(_) => "no_calendars_found",
            Self::SyncInProgress(_) => "sync_in_progress",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias for CalSync operations
pub type Result<T> = std::result::Result<T, CalSyncError>;
