//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CALDAV_SERVER_URL, DEFAULT_LOOKAHEAD_DAYS, DEFAULT_LOOKBACK_DAYS,
    DEFAULT_MAX_CONCURRENT_SYNCS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RUN_TIMEOUT_SECS,
};
use crate::errors::{CalSyncError, Result};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Credential vault configuration.
///
/// The key is 32 bytes encoded as base64 or hex. It is never serialized back
/// out.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(skip_serializing, default)]
    pub key: Option<String>,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Per-provider settings. A provider with no entry is not registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google: Option<OAuthClientConfig>,
    #[serde(default)]
    pub microsoft: Option<OAuthClientConfig>,
    #[serde(default)]
    pub apple: Option<CalDavConfig>,
}

/// OAuth client registration for Google or Microsoft.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret: String,
    /// Overrides the provider's authorization endpoint.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Overrides the provider's token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Overrides the provider's REST base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// CalDAV provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalDavConfig {
    #[serde(default = "default_caldav_server_url")]
    pub server_url: String,
}

impl Default for CalDavConfig {
    fn default() -> Self {
        Self { server_url: default_caldav_server_url() }
    }
}

/// Sync run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: default_max_attempts(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "calsync.db".to_string(), pool_size: default_pool_size() }
    }
}

impl Config {
    /// Check that everything needed to start the engine is present.
    ///
    /// # Errors
    /// Returns `CalSyncError::Config` when the encryption key is missing, no
    /// provider is configured, or an OAuth provider lacks client credentials.
    pub fn validate(&self) -> Result<()> {
        if self.encryption.key.as_deref().is_none_or(str::is_empty) {
            return Err(CalSyncError::Config("encryption key is not configured".into()));
        }

        for (name, oauth) in
            [("google", &self.providers.google), ("microsoft", &self.providers.microsoft)]
        {
            if let Some(oauth) = oauth {
                if oauth.client_id.trim().is_empty() || oauth.client_secret.trim().is_empty() {
                    return Err(CalSyncError::Config(format!(
                        "{name} provider requires client_id and client_secret"
                    )));
                }
            }
        }

        if self.providers.google.is_none()
            && self.providers.microsoft.is_none()
            && self.providers.apple.is_none()
        {
            return Err(CalSyncError::Config("no calendar provider configured".into()));
        }

        if self.sync.lookback_days < 0 || self.sync.lookahead_days <= 0 {
            return Err(CalSyncError::Config("sync window must be positive".into()));
        }

        Ok(())
    }
}

fn default_pool_size() -> u32 {
    8
}

fn default_caldav_server_url() -> String {
    DEFAULT_CALDAV_SERVER_URL.to_string()
}

fn default_lookback_days() -> i64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_lookahead_days() -> i64 {
    DEFAULT_LOOKAHEAD_DAYS
}

fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

fn default_max_concurrent_syncs() -> usize {
    DEFAULT_MAX_CONCURRENT_SYNCS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_attempts() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google() -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            auth_url: None,
            token_url: None,
            api_base_url: None,
        }
    }

    #[test]
    fn validate_requires_encryption_key() {
        let mut config = Config::default();
        config.providers.google = Some(google());

        let err = config.validate().unwrap_err();
        assert!(matches!(err, CalSyncError::Config(_)));
    }

    #[test]
    fn validate_requires_oauth_secret() {
        let mut config = Config::default();
        config.encryption.key = Some("k".repeat(44));
        config.providers.microsoft =
            Some(OAuthClientConfig { client_secret: String::new(), ..google() });

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("microsoft"));
    }

    #[test]
    fn validate_accepts_caldav_only() {
        let mut config = Config::default();
        config.encryption.key = Some("k".repeat(44));
        config.providers.apple = Some(CalDavConfig::default());

        assert!(config.validate().is_ok());
        assert_eq!(config.sync.lookback_days, 30);
        assert_eq!(config.sync.lookahead_days, 90);
    }

    #[test]
    fn secrets_are_not_serialized_or_debug_printed() {
        let mut config = Config::default();
        config.encryption.key = Some("super-secret".into());
        config.providers.google = Some(google());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("\"secret\""));
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
