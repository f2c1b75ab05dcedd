//! Upstream credentials: a shared `api-key`, or bearer tokens minted from an
//! Entra service principal.

use std::time::{Duration, Instant};

use config::EntraConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Scope requested for upstream bearer tokens.
const TOKEN_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Tokens are refreshed this long before they actually expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Errors from the token endpoint.
#[derive(Debug, Error)]
pub(crate) enum AuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },
}

/// How the middle tier authenticates to the upstream.
pub(crate) enum Credential {
    /// Shared key sent as the `api-key` header.
    Key(SecretString),
    /// Bearer tokens minted on demand and cached.
    Bearer(TokenProvider),
}

/// Client-credentials token provider with a cached token.
///
/// The provider is warmed once at startup so the first session does not pay
/// the token-fetch latency; afterwards tokens are re-fetched on demand when
/// they come within [`REFRESH_MARGIN`] of expiry.
pub(crate) struct TokenProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl TokenProvider {
    pub(crate) fn new(config: &EntraConfig) -> Self {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            config.tenant_id
        );

        Self {
            client: reqwest::Client::new(),
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Fetches and caches an initial token.
    pub(crate) async fn warm(&self) -> Result<(), AuthError> {
        self.bearer().await?;

        Ok(())
    }

    /// Returns a bearer token, re-fetching when the cached one is about to
    /// expire.
    pub(crate) async fn bearer(&self) -> Result<SecretString, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && token.expires_at.saturating_duration_since(Instant::now()) > REFRESH_MARGIN
        {
            return Ok(token.token.clone());
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());

            return Err(AuthError::Endpoint {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;

        log::debug!("minted upstream bearer token, expires in {}s", token.expires_in);

        let secret = SecretString::from(token.access_token);

        *cached = Some(CachedToken {
            token: secret.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(secret)
    }
}
