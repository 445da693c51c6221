//! Configuration loader
//!
//! Loads engine configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Loads a `.env` file into the process environment when one exists
//! 2. Attempts to load from `CALSYNC_*` environment variables
//! 3. If the required variables are missing, falls back to a config file
//! 4. Probes multiple paths for config files (JSON or TOML)
//!
//! ## Environment Variables
//! Required:
//! - `CALSYNC_DB_PATH`: SQLite database file path
//! - `CALSYNC_ENCRYPTION_KEY`: 32-byte credential key, base64 or hex
//!
//! Optional:
//! - `CALSYNC_DB_POOL_SIZE`
//! - `CALSYNC_GOOGLE_CLIENT_ID`, `CALSYNC_GOOGLE_CLIENT_SECRET`
//! - `CALSYNC_MICROSOFT_CLIENT_ID`, `CALSYNC_MICROSOFT_CLIENT_SECRET`
//! - `CALSYNC_APPLE_ENABLED` (true/false), `CALSYNC_CALDAV_SERVER_URL`
//! - `CALSYNC_SYNC_LOOKBACK_DAYS`, `CALSYNC_SYNC_LOOKAHEAD_DAYS`
//! - `CALSYNC_SYNC_RUN_TIMEOUT_SECS`, `CALSYNC_SYNC_MAX_CONCURRENT`
//! - `CALSYNC_HTTP_TIMEOUT_SECS`, `CALSYNC_HTTP_MAX_ATTEMPTS`
//! - `CALSYNC_LOG_LEVEL`, `CALSYNC_LOG_JSON` (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.json` or `./config.toml` (current working directory)
//! 2. `./calsync.json` or `./calsync.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. `../../config.json` or `../../config.toml` (grandparent directory)
//! 5. Relative to executable location
//!
//! A file without an encryption key picks it up from
//! `CALSYNC_ENCRYPTION_KEY`, so the key can stay out of checked-in files.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{
    CalDavConfig, CalSyncError, Config, DatabaseConfig, EncryptionConfig, HttpConfig,
    LoggingConfig, OAuthClientConfig, ProvidersConfig, Result, SyncConfig,
};

const ENV_DB_PATH: &str = "CALSYNC_DB_PATH";
const ENV_ENCRYPTION_KEY: &str = "CALSYNC_ENCRYPTION_KEY";

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `CalSyncError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A numeric variable does not parse
pub fn load() -> Result<Config> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "environment configuration incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `CALSYNC_DB_PATH` and `CALSYNC_ENCRYPTION_KEY` must be present. A provider
/// is enabled when its client id (or, for CalDAV, the enable flag or server
/// URL) is set.
///
/// # Errors
/// Returns `CalSyncError::Config` if required variables are missing or a
/// value does not parse.
pub fn load_from_env() -> Result<Config> {
    let path = env_var(ENV_DB_PATH)?;
    let key = env_var(ENV_ENCRYPTION_KEY)?;

    let database = DatabaseConfig {
        path,
        pool_size: env_parse("CALSYNC_DB_POOL_SIZE")?
            .unwrap_or_else(|| DatabaseConfig::default().pool_size),
    };

    let providers = ProvidersConfig {
        google: oauth_from_env("GOOGLE"),
        microsoft: oauth_from_env("MICROSOFT"),
        apple: caldav_from_env(),
    };

    let sync_defaults = SyncConfig::default();
    let sync = SyncConfig {
        lookback_days: env_parse("CALSYNC_SYNC_LOOKBACK_DAYS")?
            .unwrap_or(sync_defaults.lookback_days),
        lookahead_days: env_parse("CALSYNC_SYNC_LOOKAHEAD_DAYS")?
            .unwrap_or(sync_defaults.lookahead_days),
        run_timeout_secs: env_parse("CALSYNC_SYNC_RUN_TIMEOUT_SECS")?
            .unwrap_or(sync_defaults.run_timeout_secs),
        max_concurrent_syncs: env_parse("CALSYNC_SYNC_MAX_CONCURRENT")?
            .unwrap_or(sync_defaults.max_concurrent_syncs),
    };

    let http_defaults = HttpConfig::default();
    let http = HttpConfig {
        request_timeout_secs: env_parse("CALSYNC_HTTP_TIMEOUT_SECS")?
            .unwrap_or(http_defaults.request_timeout_secs),
        max_attempts: env_parse("CALSYNC_HTTP_MAX_ATTEMPTS")?
            .unwrap_or(http_defaults.max_attempts),
    };

    let logging = LoggingConfig {
        level: env_opt("CALSYNC_LOG_LEVEL").unwrap_or_else(|| LoggingConfig::default().level),
        json: env_bool("CALSYNC_LOG_JSON", false),
    };

    Ok(Config {
        database,
        encryption: EncryptionConfig { key: Some(key) },
        providers,
        sync,
        http,
        logging,
    })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CalSyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CalSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CalSyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CalSyncError::Config(format!("Failed to read config file: {e}")))?;

    let mut config = parse_config(&contents, &config_path)?;
    if config.encryption.key.is_none() {
        config.encryption.key = env_opt(ENV_ENCRYPTION_KEY);
    }
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CalSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches for config files in the following locations (in order):
/// 1. Current working directory (`./config.{json,toml}`,
///    `./calsync.{json,toml}`)
/// 2. Parent directories (up to 2 levels)
/// 3. Relative to executable location
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidates_in(&cwd));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidates_in(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidates_in(dir: &Path) -> [PathBuf; 8] {
    [
        dir.join("config.json"),
        dir.join("config.toml"),
        dir.join("calsync.json"),
        dir.join("calsync.toml"),
        dir.join("../config.json"),
        dir.join("../config.toml"),
        dir.join("../../config.json"),
        dir.join("../../config.toml"),
    ]
}

fn oauth_from_env(provider: &str) -> Option<OAuthClientConfig> {
    let client_id = env_opt(&format!("CALSYNC_{provider}_CLIENT_ID"))?;
    Some(OAuthClientConfig {
        client_id,
        client_secret: env_opt(&format!("CALSYNC_{provider}_CLIENT_SECRET")).unwrap_or_default(),
        auth_url: None,
        token_url: None,
        api_base_url: None,
    })
}

fn caldav_from_env() -> Option<CalDavConfig> {
    let server_url = env_opt("CALSYNC_CALDAV_SERVER_URL");
    if server_url.is_none() && !env_bool("CALSYNC_APPLE_ENABLED", false) {
        return None;
    }
    Some(server_url.map_or_else(CalDavConfig::default, |server_url| CalDavConfig { server_url }))
}

/// Get required environment variable
///
/// # Errors
/// Returns `CalSyncError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    env_opt(key).ok_or_else(|| {
        CalSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Non-empty environment variable, trimmed.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| CalSyncError::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
///
/// # Returns
/// The parsed boolean value, or `default` if not set.
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
