//! Upstream realtime endpoint configuration settings.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Connection settings for the upstream realtime deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the upstream resource, e.g. `https://example.openai.azure.com`.
    pub endpoint: Option<Url>,
    /// Name of the realtime model deployment.
    pub deployment: Option<String>,
    /// Upstream API version sent as the `api-version` query parameter.
    pub api_version: String,
    /// Shared key sent as the `api-key` header. When absent, an Entra
    /// service principal must be configured instead.
    pub api_key: Option<SecretString>,
    /// Entra service principal used to mint bearer tokens when no shared
    /// key is configured.
    pub entra: Option<EntraConfig>,
    /// Upper bound on the upstream WebSocket handshake.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: None,
            api_version: "2024-10-01-preview".to_string(),
            api_key: None,
            entra: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Entra client-credentials settings for bearer authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntraConfig {
    /// Directory (tenant) identifier.
    pub tenant_id: String,
    /// Application (client) identifier.
    pub client_id: String,
    /// Client secret of the service principal.
    pub client_secret: SecretString,
}
