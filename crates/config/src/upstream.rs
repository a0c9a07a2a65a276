use secrecy::SecretString;
use serde::Deserialize;

/// Default upstream credentials and endpoints.
///
/// When no explicit `[[channels]]` entries exist, these seed one implicit
/// channel per configured provider.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamDefaults {
    /// API key for the default OpenAI-compatible upstream.
    pub openai_api_key: Option<SecretString>,

    /// Base URL for the default OpenAI-compatible upstream.
    pub openai_base_url: Option<String>,

    /// API key for the default Anthropic upstream.
    pub claude_api_key: Option<SecretString>,

    /// Base URL for the default Anthropic upstream.
    pub claude_base_url: Option<String>,
}
