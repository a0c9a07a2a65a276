use std::{collections::HashSet, path::Path};

use anyhow::bail;
use indoc::indoc;

use crate::Config;

/// Load and validate a configuration document.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    let has_defaults =
        config.upstream.openai_api_key.is_some() || config.upstream.claude_api_key.is_some();

    if config.channels.is_empty() && !has_defaults {
        bail!(indoc! {r#"
            No upstream configured. ccproxy requires at least one channel or a default
            upstream credential to function.

            Example configuration:

              [upstream]
              openai_api_key = "sk-..."

            or:

              [[channels]]
              id = "primary"
              provider = "openai"
              api_key = "sk-..."
        "#});
    }

    let mut ids = HashSet::new();
    let mut custom_keys = HashSet::new();

    for channel in &config.channels {
        if !ids.insert(channel.id.as_str()) {
            bail!("Duplicate channel id '{}'", channel.id);
        }

        if !(1..=100).contains(&channel.weight) {
            bail!("Channel '{}': weight must be within 1..=100", channel.id);
        }

        if !(1..=10).contains(&channel.priority) {
            bail!("Channel '{}': priority must be within 1..=10", channel.id);
        }

        // custom_key uniqueness only matters across enabled channels.
        if channel.enabled
            && let Some(key) = channel.custom_key.as_deref()
            && !key.is_empty()
            && !custom_keys.insert(key)
        {
            bail!("Channel '{}': custom_key is already used by another enabled channel", channel.id);
        }
    }

    Ok(())
}
