//! Server-enforced session configuration settings.

use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

/// Session settings the middle tier enforces on every upstream session,
/// regardless of what a client asks for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Voice used for audio output. Can be changed between sessions via the
    /// voice control endpoint.
    pub voice: String,
    /// Inline system instructions. Takes precedence over `prompt`.
    pub instructions: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maps to `session.max_response_output_tokens` upstream.
    pub max_tokens: Option<u32>,
    /// Disables audio output upstream when set.
    pub disable_audio: Option<bool>,
    /// Where to load the system prompt from when no inline instructions are
    /// configured.
    pub prompt: Option<PromptConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            instructions: None,
            temperature: None,
            max_tokens: None,
            disable_audio: None,
            prompt: None,
        }
    }
}

/// Source for the system prompt. When both are set, the URL is tried first
/// and the file is the fallback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptConfig {
    /// HTTP(S) location serving the prompt as plain text.
    pub url: Option<Url>,
    /// Local file containing the prompt.
    pub file: Option<PathBuf>,
}
