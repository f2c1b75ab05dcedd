//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod loader;
mod retrieval;
mod server;
mod session;
mod upstream;

use std::path::Path;

pub use retrieval::{EmbeddingConfig, RetrievalConfig, StoreConfig};
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig};
pub use session::{PromptConfig, SessionConfig};
pub use upstream::{EntraConfig, UpstreamConfig};

/// Main configuration structure for the switchboard application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream realtime endpoint configuration settings.
    pub upstream: UpstreamConfig,
    /// Server-enforced session configuration settings.
    pub session: SessionConfig,
    /// Retrieval backend configuration (knowledge-base tools).
    pub retrieval: Option<RetrievalConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration describes a usable upstream.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
