use std::fmt;

use serde::{Deserialize, Serialize};

/// The three wire protocols the proxy speaks.
///
/// Used both for the caller side (detected or declared) and for the upstream
/// side (a channel's provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// Anthropic Messages.
    Anthropic,
    /// OpenAI-compatible Chat Completions.
    Openai,
    /// Google Gemini GenerateContent.
    Gemini,
}

impl ApiFormat {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ApiFormat::Anthropic => "anthropic",
            ApiFormat::Openai => "openai",
            ApiFormat::Gemini => "gemini",
        }
    }

    /// Parse a lowercase name, e.g. from a `/model provider:name` command or
    /// the unified endpoint's `source_format` field.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(ApiFormat::Anthropic),
            "openai" => Some(ApiFormat::Openai),
            "gemini" | "google" => Some(ApiFormat::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<config::ChannelProvider> for ApiFormat {
    fn from(provider: config::ChannelProvider) -> Self {
        match provider {
            config::ChannelProvider::Openai => ApiFormat::Openai,
            config::ChannelProvider::Anthropic => ApiFormat::Anthropic,
            config::ChannelProvider::Gemini => ApiFormat::Gemini,
        }
    }
}
