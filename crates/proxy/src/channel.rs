//! Upstream channels: configuration, health metrics, storage, and selection.

pub mod manager;
pub mod store;

use std::collections::BTreeMap;

use secrecy::SecretString;

pub use manager::ChannelManager;
pub use store::{ChannelStore, InMemoryChannelStore};

use crate::{endpoint, format::ApiFormat};

/// One configured upstream endpoint with credentials and health state.
///
/// Selection works on owned snapshots of this struct; consumers never hold a
/// pointer into the manager's cache.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Stable identifier, unique across channels.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Which wire protocol the upstream speaks.
    pub provider: ApiFormat,

    /// Base URL of the upstream endpoint.
    pub base_url: String,

    /// Credential presented to the upstream.
    pub api_key: SecretString,

    /// Opaque token callers may present to select this channel.
    pub custom_key: Option<String>,

    /// Per-channel request timeout in seconds.
    pub timeout_s: Option<u64>,

    /// Advisory retry budget. Recorded but never acted on.
    pub max_retries: u32,

    /// Whether the channel participates in selection.
    pub enabled: bool,

    /// Selection weight, 1..=100.
    pub weight: u8,

    /// Selection priority, 1..=10. Higher wins.
    pub priority: u8,

    /// Final model rename applied after routing.
    pub models_mapping: BTreeMap<String, String>,

    /// Rolling health metrics.
    pub metrics: ChannelMetrics,
}

/// Rolling per-channel health metrics.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMetrics {
    /// Total requests dispatched through this channel.
    pub request_count: u64,

    /// Requests that failed.
    pub error_count: u64,

    /// 1 − error_count/request_count, 1.0 while unused.
    pub success_rate: f64,

    /// Total tokens billed through this channel.
    pub total_tokens: u64,

    /// Exponentially weighted average response time in seconds.
    pub avg_response_time_s: f64,

    /// Unix timestamp of the last dispatch.
    pub last_used_at: Option<u64>,
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            success_rate: 1.0,
            total_tokens: 0,
            avg_response_time_s: 0.0,
            last_used_at: None,
        }
    }
}

impl Channel {
    /// Health-weighted selection score.
    pub fn score(&self) -> f64 {
        let error_ratio = if self.metrics.request_count == 0 {
            0.0
        } else {
            self.metrics.error_count as f64 / self.metrics.request_count as f64
        };

        10.0 * self.priority as f64 + self.weight as f64 + 50.0 * self.metrics.success_rate
            - 20.0 * error_ratio
            - 2.0 * (self.metrics.avg_response_time_s - 5.0).max(0.0)
    }

    /// Whether the channel is still on probation and exempt from the health
    /// filter.
    pub fn on_probation(&self) -> bool {
        self.metrics.request_count < 10
    }
}

impl From<config::ChannelConfig> for Channel {
    fn from(config: config::ChannelConfig) -> Self {
        let provider = ApiFormat::from(config.provider);

        let base_url = config.base_url.unwrap_or_else(|| default_base_url(provider).to_string());

        Self {
            id: config.id,
            name: config.name,
            provider,
            base_url,
            api_key: config.api_key,
            custom_key: config.custom_key.filter(|key| !key.is_empty()),
            timeout_s: config.timeout_s,
            max_retries: config.max_retries,
            enabled: config.enabled,
            weight: config.weight,
            priority: config.priority,
            models_mapping: config.models_mapping,
            metrics: ChannelMetrics::default(),
        }
    }
}

fn default_base_url(provider: ApiFormat) -> &'static str {
    match provider {
        ApiFormat::Openai => endpoint::DEFAULT_OPENAI_API_URL,
        ApiFormat::Anthropic => endpoint::DEFAULT_ANTHROPIC_API_URL,
        ApiFormat::Gemini => endpoint::DEFAULT_GEMINI_API_URL,
    }
}

#[cfg(test)]
pub(crate) fn test_channel(id: &str, provider: ApiFormat) -> Channel {
    Channel {
        id: id.to_string(),
        name: id.to_string(),
        provider,
        base_url: default_base_url(provider).to_string(),
        api_key: SecretString::from("test-key".to_string()),
        custom_key: None,
        timeout_s: None,
        max_retries: 0,
        enabled: true,
        weight: 50,
        priority: 5,
        models_mapping: BTreeMap::new(),
        metrics: ChannelMetrics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_reflects_health() {
        let mut healthy = test_channel("a", ApiFormat::Openai);
        healthy.metrics = ChannelMetrics {
            request_count: 100,
            error_count: 0,
            success_rate: 1.0,
            total_tokens: 0,
            avg_response_time_s: 1.0,
            last_used_at: None,
        };

        let mut flaky = test_channel("b", ApiFormat::Openai);
        flaky.metrics = ChannelMetrics {
            request_count: 100,
            error_count: 10,
            success_rate: 0.9,
            total_tokens: 0,
            avg_response_time_s: 2.0,
            last_used_at: None,
        };

        assert!(healthy.score() > flaky.score());
    }

    #[test]
    fn slow_channels_are_penalized() {
        let mut fast = test_channel("fast", ApiFormat::Openai);
        fast.metrics.avg_response_time_s = 4.0;

        let mut slow = test_channel("slow", ApiFormat::Openai);
        slow.metrics.avg_response_time_s = 9.0;

        // Below the 5s grace threshold there is no penalty at all.
        assert_eq!(fast.score(), 10.0 * 5.0 + 50.0 + 50.0);
        assert_eq!(slow.score(), fast.score() - 8.0);
    }
}
