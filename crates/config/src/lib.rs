//! ccproxy configuration structures to map the ccproxy.toml configuration.

#![deny(missing_docs)]

mod channels;
mod keys;
mod loader;
mod proxy_transport;
mod routing;
mod server;
mod upstream;

pub use channels::{ChannelConfig, ChannelProvider};
pub use keys::{ConfigKey, ConfigProvider, ConfigProviderExt};
pub use loader::load;
pub use proxy_transport::{ProxyTransportConfig, ProxyType};
pub use routing::RoutingConfig;
pub use server::ServerConfig;
pub use upstream::UpstreamDefaults;

use secrecy::ExposeSecret;
use serde::Deserialize;

/// Main configuration structure for the ccproxy application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,

    /// Default upstream credentials and endpoints, used to seed implicit
    /// channels when no explicit `[[channels]]` entries are configured.
    pub upstream: UpstreamDefaults,

    /// Model routing configuration (big/small aliases, limits).
    pub routing: RoutingConfig,

    /// Outbound proxy transport configuration (HTTP or SOCKS5).
    pub proxy: ProxyTransportConfig,

    /// Explicitly configured upstream channels.
    pub channels: Vec<ChannelConfig>,
}

impl ConfigProvider for Config {
    fn get_string(&self, key: ConfigKey) -> Option<String> {
        if let Ok(value) = std::env::var(key.env_var()) {
            return Some(value);
        }

        match key {
            ConfigKey::OpenaiApiKey => self
                .upstream
                .openai_api_key
                .as_ref()
                .map(|key| key.expose_secret().to_string()),
            ConfigKey::OpenaiBaseUrl => self.upstream.openai_base_url.clone(),
            ConfigKey::ClaudeApiKey => self
                .upstream
                .claude_api_key
                .as_ref()
                .map(|key| key.expose_secret().to_string()),
            ConfigKey::ClaudeBaseUrl => self.upstream.claude_base_url.clone(),
            ConfigKey::BigModel => self.routing.big_model.clone(),
            ConfigKey::SmallModel => self.routing.small_model.clone(),
            ConfigKey::ProxyType => self.proxy.proxy_type.map(|t| t.to_string()),
            ConfigKey::HttpProxy => self.proxy.http_proxy.clone(),
            ConfigKey::Socks5Proxy => self.proxy.socks5_proxy.clone(),
            ConfigKey::Socks5ProxyUser => self.proxy.socks5_proxy_user.clone(),
            ConfigKey::Socks5ProxyPassword => self
                .proxy
                .socks5_proxy_password
                .as_ref()
                .map(|password| password.expose_secret().to_string()),
            _ => None,
        }
    }

    fn get_bool(&self, key: ConfigKey) -> Option<bool> {
        if let Ok(value) = std::env::var(key.env_var()) {
            return value.parse().ok();
        }

        match key {
            ConfigKey::StreamEnabled => Some(self.routing.stream_enabled),
            ConfigKey::ProxyEnabled => Some(self.proxy.enabled),
            ConfigKey::IgnoreSslVerification => Some(self.proxy.ignore_ssl_verification),
            _ => None,
        }
    }

    fn get_u64(&self, key: ConfigKey) -> Option<u64> {
        if let Ok(value) = std::env::var(key.env_var()) {
            return value.parse().ok();
        }

        match key {
            ConfigKey::RequestTimeout => Some(self.routing.request_timeout),
            ConfigKey::MaxTokensLimit => Some(self.routing.max_tokens_limit),
            _ => None,
        }
    }

    fn get_f32(&self, key: ConfigKey) -> Option<f32> {
        if let Ok(value) = std::env::var(key.env_var()) {
            return value.parse().ok();
        }

        match key {
            ConfigKey::Temperature => self.routing.temperature,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.routing.big_model, Some("gpt-4o".to_string()));
        assert_eq!(config.routing.small_model, Some("gpt-4o-mini".to_string()));
        assert_eq!(config.routing.request_timeout, 90);
        assert!(config.channels.is_empty());
        assert!(!config.proxy.enabled);
    }

    #[test]
    fn full_document() {
        let config: Config = toml::from_str(indoc! {r#"
            [server]
            listen_address = "0.0.0.0:8082"

            [upstream]
            openai_api_key = "sk-test"
            openai_base_url = "https://api.x.ai"

            [routing]
            big_model = "gpt-4o"
            small_model = "gpt-4o-mini"
            request_timeout = 120

            [proxy]
            enabled = true
            proxy_type = "socks5"
            socks5_proxy = "socks5://127.0.0.1:1080"

            [[channels]]
            id = "primary"
            name = "Primary OpenAI"
            provider = "openai"
            base_url = "https://api.openai.com/v1"
            api_key = "sk-chan"
            weight = 80
            priority = 7
        "#})
        .unwrap();

        assert_eq!(config.server.listen_address.to_string(), "0.0.0.0:8082");
        assert_eq!(config.routing.request_timeout, 120);
        assert_eq!(config.proxy.proxy_type, Some(ProxyType::Socks5));
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].weight, 80);
        assert_eq!(config.channels[0].provider, ChannelProvider::Openai);
    }

    #[test]
    fn provider_lookup_falls_back_to_document() {
        let config: Config = toml::from_str(indoc! {r#"
            [routing]
            big_model = "claude-sonnet-4"
        "#})
        .unwrap();

        assert_eq!(
            config.get_string(ConfigKey::BigModel).as_deref(),
            Some("claude-sonnet-4")
        );
        assert_eq!(config.get_u64(ConfigKey::RequestTimeout), Some(90));
        assert_eq!(config.get_bool(ConfigKey::StreamEnabled), Some(true));
    }
}
