use std::{path::Path, sync::OnceLock};

use anyhow::bail;
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_placeholders(&mut String::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.upstream.endpoint.is_none() || config.upstream.deployment.is_none() {
        bail!(indoc! {r#"
            No upstream realtime deployment configured. Switchboard requires an endpoint and a deployment to function.

            Example configuration:

              [upstream]
              endpoint = "https://example.openai.azure.com"
              deployment = "gpt-4o-realtime-preview"
              api_key = "{{ env.AZURE_OPENAI_API_KEY }}"
        "#});
    }

    if config.upstream.api_key.is_none() && config.upstream.entra.is_none() {
        bail!(indoc! {r#"
            No upstream credentials configured. Provide a shared key or an Entra service principal.

            For a shared key:

              [upstream]
              api_key = "{{ env.AZURE_OPENAI_API_KEY }}"

            For bearer authentication:

              [upstream.entra]
              tenant_id = "..."
              client_id = "..."
              client_secret = "{{ env.AZURE_CLIENT_SECRET }}"
        "#});
    }

    if let Some(prompt) = config.session.prompt.as_ref()
        && prompt.url.is_none()
        && prompt.file.is_none()
    {
        bail!("A [session.prompt] section is configured but has neither a url nor a file");
    }

    Ok(())
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex must be valid")
    })
}

/// Replaces `{{ env.NAME }}` placeholders in every string value of the
/// configuration tree. `path` tracks the position for error reporting.
fn expand_env_placeholders(path: &mut String, value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if !s.contains("{{") {
                return Ok(());
            }

            let mut missing = None;

            let expanded = placeholder_regex()
                .replace_all(s, |captures: &regex::Captures<'_>| {
                    let name = &captures[1];

                    match std::env::var(name) {
                        Ok(value) => value,
                        Err(_) => {
                            missing.get_or_insert_with(|| name.to_string());
                            String::new()
                        }
                    }
                })
                .into_owned();

            if let Some(name) = missing {
                bail!("Failed to expand configuration value at path '{path}': environment variable '{name}' is not set");
            }

            *s = expanded;
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{i}]"));
                expand_env_placeholders(path, value)?;
                path.truncate(len);
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                let len = path.len();

                if !path.is_empty() {
                    path.push('.');
                }

                path.push_str(key);
                expand_env_placeholders(path, value)?;
                path.truncate(len);
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
