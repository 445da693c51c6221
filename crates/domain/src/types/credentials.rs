//! Transient provider credentials

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Plaintext provider credentials.
///
/// Only ever lives for the duration of one operation. The vault encrypts the
/// tokens before anything is written to storage, and `Debug` output never
/// includes them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Provider-side account identifier when the auth exchange reveals one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scope: None,
            account_id: None,
        }
    }

    /// Build credentials from an OAuth token response, converting the
    /// relative `expires_in` into an absolute expiry.
    pub fn from_token_response(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
        scope: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at =
            expires_in.filter(|secs| *secs > 0).map(|secs| now + Duration::seconds(secs));
        Self { access_token, refresh_token, expires_at, scope, account_id: None }
    }

    /// True when the token expires within `buffer_secs` of `now`.
    ///
    /// Credentials without an expiry never need refreshing.
    pub fn expires_within(&self, buffer_secs: i64, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(buffer_secs) >= expires_at,
            None => false,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("account_id", &self.account_id)
            .finish()
    }
}
