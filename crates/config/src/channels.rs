use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// One configured upstream channel.
///
/// Channels declared in the configuration document seed the channel store at
/// startup; the admin surface may add more at runtime through the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Stable identifier, unique across channels.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    /// Which wire protocol the upstream speaks.
    pub provider: ChannelProvider,

    /// Base URL of the upstream endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Credential presented to the upstream.
    pub api_key: SecretString,

    /// Opaque token callers may present to select this channel.
    #[serde(default)]
    pub custom_key: Option<String>,

    /// Per-channel request timeout in seconds.
    #[serde(default)]
    pub timeout_s: Option<u64>,

    /// Advisory retry budget. Recorded but not acted on.
    #[serde(default)]
    pub max_retries: u32,

    /// Whether the channel participates in selection.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Selection weight, 1..=100.
    #[serde(default = "default_weight")]
    pub weight: u8,

    /// Selection priority, 1..=10. Higher wins.
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Final model rename applied after routing.
    #[serde(default)]
    pub models_mapping: BTreeMap<String, String>,
}

/// Wire protocol spoken by an upstream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelProvider {
    /// OpenAI-compatible chat completions.
    Openai,
    /// Anthropic Messages.
    Anthropic,
    /// Google Gemini GenerateContent.
    Gemini,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> u8 {
    50
}

fn default_priority() -> u8 {
    5
}
