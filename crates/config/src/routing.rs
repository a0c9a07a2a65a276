use serde::Deserialize;

/// Model routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Alias substituted for heavy requests (tools, long inputs, thinking).
    pub big_model: Option<String>,

    /// Alias substituted for everything else.
    pub small_model: Option<String>,

    /// Upstream request timeout in seconds, used when a channel does not set
    /// its own.
    pub request_timeout: u64,

    /// Upper bound applied to requested max_tokens.
    pub max_tokens_limit: u64,

    /// Default sampling temperature when the caller omits one.
    pub temperature: Option<f32>,

    /// Whether streaming responses are allowed.
    pub stream_enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            big_model: Some("gpt-4o".to_string()),
            small_model: Some("gpt-4o-mini".to_string()),
            request_timeout: 90,
            max_tokens_limit: 8192,
            temperature: None,
            stream_enabled: true,
        }
    }
}
