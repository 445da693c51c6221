//! OAuth2 authorization-code flow for the Google and Microsoft adapters.
//!
//! Builds consent URLs that carry the user id as `state`, redeems codes at the
//! provider token endpoint and refreshes access tokens. Token endpoint
//! rejections (400/401) surface as `CalSyncError::Auth`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use calsync_domain::{CalSyncError, CalendarProvider, Credentials, OAuthClientConfig, Result};
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::errors::{status_error, InfraError};
use crate::http::HttpClient;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const MICROSOFT_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Endpoints, client credentials and scopes for one OAuth provider.
#[derive(Clone)]
pub struct OAuthSettings {
    pub provider: CalendarProvider,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub scopes: Vec<String>,
    pub extra_authorize_params: Vec<(String, String)>,
    pub extra_token_params: Vec<(String, String)>,
}

impl OAuthSettings {
    /// Google settings with offline access so a refresh token is issued.
    pub fn google(config: &OAuthClientConfig) -> Self {
        Self {
            provider: CalendarProvider::Google,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorization_endpoint: config
                .auth_url
                .clone()
                .unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_endpoint: config
                .token_url
                .clone()
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            revocation_endpoint: Some(GOOGLE_REVOKE_URL.to_string()),
            scopes: vec![
                "https://www.googleapis.com/auth/calendar".to_string(),
                "openid".to_string(),
                "email".to_string(),
            ],
            extra_authorize_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
            extra_token_params: Vec::new(),
        }
    }

    /// Microsoft identity platform (v2 endpoint, multi-tenant).
    pub fn microsoft(config: &OAuthClientConfig) -> Self {
        let scopes = vec![
            "offline_access".to_string(),
            "openid".to_string(),
            "email".to_string(),
            "User.Read".to_string(),
            "Calendars.ReadWrite".to_string(),
        ];
        Self {
            provider: CalendarProvider::Microsoft,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorization_endpoint: config
                .auth_url
                .clone()
                .unwrap_or_else(|| MICROSOFT_AUTH_URL.to_string()),
            token_endpoint: config
                .token_url
                .clone()
                .unwrap_or_else(|| MICROSOFT_TOKEN_URL.to_string()),
            revocation_endpoint: None,
            extra_token_params: vec![("scope".to_string(), scopes.join(" "))],
            scopes,
            extra_authorize_params: vec![("response_mode".to_string(), "query".to_string())],
        }
    }

    /// Consent URL for `user_id`; the id round-trips through `state`.
    pub fn authorize_url(&self, user_id: &str, redirect_uri: &str) -> Result<String> {
        let scope = self.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", user_id),
        ];
        params.extend(self.extra_authorize_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let url = Url::parse_with_params(&self.authorization_endpoint, &params).map_err(|err| {
            CalSyncError::Config(format!(
                "invalid {} authorization endpoint: {err}",
                self.provider
            ))
        })?;
        Ok(url.into())
    }
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Raw token endpoint payload.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint client shared by the OAuth adapters.
#[derive(Clone)]
pub struct OAuthClient {
    settings: OAuthSettings,
    http: HttpClient,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings, http: HttpClient) -> Self {
        Self { settings, http }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn authorize_url(&self, user_id: &str, redirect_uri: &str) -> Result<String> {
        self.settings.authorize_url(user_id, redirect_uri)
    }

    /// Redeem an authorization code. The account email is read from the ID
    /// token when the provider returns one.
    #[instrument(skip(self, code), fields(provider = %self.settings.provider))]
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credentials> {
        if code.trim().is_empty() {
            return Err(CalSyncError::Auth("authorization code is empty".into()));
        }

        let tokens = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let account_id = tokens.id_token.as_deref().and_then(|token| {
            extract_email_from_id_token(token)
                .map_err(|err| debug!(error = %err, "id token carried no usable email"))
                .ok()
        });

        let mut credentials = Credentials::from_token_response(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.scope,
            Utc::now(),
        );
        credentials.account_id = account_id;
        Ok(credentials)
    }

    /// Trade the refresh token for a new access token. Providers that do not
    /// rotate refresh tokens leave the stored one in place.
    #[instrument(skip(self, credentials), fields(provider = %self.settings.provider))]
    pub async fn refresh(&self, credentials: &Credentials) -> Result<Credentials> {
        let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
            CalSyncError::TokenExpired(format!(
                "{} credentials have no refresh token",
                self.settings.provider
            ))
        })?;

        let tokens = self
            .token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await?;

        let mut refreshed = Credentials::from_token_response(
            tokens.access_token,
            tokens.refresh_token.or_else(|| credentials.refresh_token.clone()),
            tokens.expires_in,
            tokens.scope.or_else(|| credentials.scope.clone()),
            Utc::now(),
        );
        refreshed.account_id = credentials.account_id.clone();
        debug!(expires_at = ?refreshed.expires_at, "access token refreshed");
        Ok(refreshed)
    }

    /// POST `token` to the revocation endpoint, if the provider has one.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let Some(endpoint) = self.settings.revocation_endpoint.as_deref() else {
            return Ok(());
        };
        let request = self.http.request(Method::POST, endpoint).form(&[("token", token)]);
        let response = self.http.send(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(status_error(status, &detail))
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);
        form.extend(self.settings.extra_token_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let request = self.http.request(Method::POST, &self.settings.token_endpoint).form(&form);
        let response = self.http.send(request).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await.map_err(InfraError::from)?);
        }

        let body = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            let parsed: TokenErrorBody = serde_json::from_str(&body).unwrap_or_default();
            let reason = parsed.error.unwrap_or_else(|| status.to_string());
            return Err(CalSyncError::Auth(match parsed.error_description {
                Some(description) => format!(
                    "{} token endpoint rejected the request: {reason}: {description}",
                    self.settings.provider
                ),
                None => format!(
                    "{} token endpoint rejected the request: {reason}",
                    self.settings.provider
                ),
            }));
        }
        Err(status_error(status, &body))
    }
}

/// Extract the account email from an ID token (JWT) without verifying it.
///
/// Falls back to `preferred_username`, which Microsoft populates when the
/// `email` claim is absent.
pub fn extract_email_from_id_token(id_token: &str) -> Result<String> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(CalSyncError::InvalidInput("invalid ID token format".into()));
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).map_err(|err| {
        CalSyncError::InvalidInput(format!("failed to decode ID token payload: {err}"))
    })?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).map_err(|err| {
        CalSyncError::InvalidInput(format!("failed to parse ID token payload: {err}"))
    })?;

    ["email", "preferred_username"]
        .iter()
        .find_map(|claim| payload.get(claim).and_then(|value| value.as_str()))
        .map(str::to_string)
        .ok_or_else(|| CalSyncError::InvalidInput("email claim missing from ID token".into()))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_config(server: &MockServer) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            auth_url: None,
            token_url: Some(format!("{}/token", server.uri())),
            api_base_url: None,
        }
    }

    fn id_token(claims: &serde_json::Value) -> String {
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("eyJhbGciOiJub25lIn0.{payload}.sig")
    }

    fn oauth(server: &MockServer) -> OAuthClient {
        let http = HttpClient::builder().max_attempts(1).build().unwrap();
        OAuthClient::new(OAuthSettings::google(&client_config(server)), http)
    }

    #[test]
    fn google_authorize_url_carries_state_and_offline_access() {
        let config = OAuthClientConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            auth_url: None,
            token_url: None,
            api_base_url: None,
        };
        let url = OAuthSettings::google(&config)
            .authorize_url("user-42", "https://app.example/callback")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert_eq!(params["state"], "user-42");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["redirect_uri"], "https://app.example/callback");
        assert!(params["scope"].contains("auth/calendar"));
    }

    #[test]
    fn microsoft_authorize_url_uses_query_response_mode() {
        let config = OAuthClientConfig {
            client_id: "ms-client".into(),
            client_secret: "shh".into(),
            auth_url: None,
            token_url: None,
            api_base_url: None,
        };
        let url = OAuthSettings::microsoft(&config).authorize_url("user-7", "http://cb").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(MICROSOFT_AUTH_URL));
        assert_eq!(params["response_mode"], "query");
        assert_eq!(params["state"], "user-7");
        assert!(params["scope"].contains("offline_access"));
        assert!(!params.contains_key("access_type"));
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let config = OAuthClientConfig {
            client_id: "client-123".into(),
            client_secret: "super-secret".into(),
            auth_url: None,
            token_url: None,
            api_base_url: None,
        };
        let rendered = format!("{:?}", OAuthSettings::google(&config));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn email_is_read_from_id_token() {
        let token = id_token(&serde_json::json!({"email": "coach@example.com"}));
        assert_eq!(extract_email_from_id_token(&token).unwrap(), "coach@example.com");

        let token = id_token(&serde_json::json!({"preferred_username": "coach@contoso.com"}));
        assert_eq!(extract_email_from_id_token(&token).unwrap(), "coach@contoso.com");

        assert!(extract_email_from_id_token("not-a-jwt").is_err());
    }

    #[tokio::test]
    async fn exchange_code_returns_credentials_with_expiry_and_account() {
        let server = MockServer::start().await;
        let token = id_token(&serde_json::json!({"email": "coach@example.com"}));
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": "calendar",
                "id_token": token,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = oauth(&server).exchange_code("abc", "http://cb").await.unwrap();

        assert_eq!(credentials.access_token, "at-1");
        assert_eq!(credentials.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(credentials.account_id.as_deref(), Some("coach@example.com"));
        assert!(credentials.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn rejected_code_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request",
            })))
            .mount(&server)
            .await;

        let err = oauth(&server).exchange_code("stale", "http://cb").await.unwrap_err();
        match err {
            CalSyncError::Auth(message) => assert!(message.contains("invalid_grant")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let mut current = Credentials::new("at-1");
        current.refresh_token = Some("rt-1".into());
        current.account_id = Some("coach@example.com".into());

        let refreshed = oauth(&server).refresh(&current).await.unwrap();
        assert_eq!(refreshed.access_token, "at-2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(refreshed.account_id.as_deref(), Some("coach@example.com"));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_token_expired() {
        let server = MockServer::start().await;
        let err = oauth(&server).refresh(&Credentials::new("at-1")).await.unwrap_err();
        assert!(matches!(err, CalSyncError::TokenExpired(_)));
    }
}
