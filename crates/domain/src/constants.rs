//! Engine constants
//!
//! Centralized location for domain-level constants shared by the core services
//! and the provider adapters.

// Sync window
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 90;

// Credential lifecycle
pub const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;
pub const ENCRYPTION_KEY_LEN: usize = 32;

// Run budgets
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 4;

// CalDAV
pub const DEFAULT_CALDAV_SERVER_URL: &str = "https://caldav.icloud.com";
/// Returned by the CalDAV adapter instead of an authorization URL; the caller
/// must collect a username and app-specific password.
pub const CALDAV_MANUAL_AUTH_URL: &str = "calsync://caldav/manual-credentials";

// Sync log
pub const DEFAULT_SYNC_HISTORY_LIMIT: usize = 20;
