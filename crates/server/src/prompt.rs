//! System prompt resolution.
//!
//! Instructions come from, in priority order: inline configuration, a
//! prompt URL, a local prompt file. Failures fall through to the next
//! source with a warning so a flaky prompt host does not keep the service
//! down.

use config::SessionConfig;
use url::Url;

pub(crate) async fn resolve(config: &SessionConfig) -> Option<String> {
    if let Some(instructions) = &config.instructions {
        return Some(instructions.clone());
    }

    let prompt = config.prompt.as_ref()?;

    if let Some(url) = &prompt.url {
        match fetch(url).await {
            Ok(text) => return Some(text),
            Err(err) => log::warn!("Could not fetch the system prompt from {url}: {err}"),
        }
    }

    if let Some(file) = &prompt.file {
        match std::fs::read_to_string(file) {
            Ok(text) => return Some(text),
            Err(err) => log::warn!("Could not read the system prompt from {}: {err}", file.display()),
        }
    }

    None
}

async fn fetch(url: &Url) -> Result<String, reqwest::Error> {
    let response = reqwest::get(url.clone()).await?.error_for_status()?;

    response.text().await
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use config::Config;
    use indoc::indoc;

    #[tokio::test]
    async fn inline_instructions_win() {
        let config: Config = toml::from_str(indoc! {r#"
            [session]
            instructions = "You are A."
        "#})
        .unwrap();

        assert_eq!(super::resolve(&config.session).await.as_deref(), Some("You are A."));
    }

    #[tokio::test]
    async fn prompt_file_is_read_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "You are B.").unwrap();

        let config: Config = toml::from_str(&format!(
            "[session.prompt]\nfile = \"{}\"\n",
            file.path().display()
        ))
        .unwrap();

        assert_eq!(super::resolve(&config.session).await.as_deref(), Some("You are B."));
    }

    #[tokio::test]
    async fn missing_sources_resolve_to_none() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(super::resolve(&config.session).await, None);

        let config: Config = toml::from_str(indoc! {r#"
            [session.prompt]
            file = "/nonexistent/system_prompt.md"
        "#})
        .unwrap();

        assert_eq!(super::resolve(&config.session).await, None);
    }
}
