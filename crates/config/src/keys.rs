use secrecy::SecretString;

/// Enumerated configuration keys the core reads through a [`ConfigProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Default OpenAI-compatible API key.
    OpenaiApiKey,
    /// Default OpenAI-compatible base URL.
    OpenaiBaseUrl,
    /// Default Anthropic API key.
    ClaudeApiKey,
    /// Default Anthropic base URL.
    ClaudeBaseUrl,
    /// Model alias used for heavy requests.
    BigModel,
    /// Model alias used for light requests.
    SmallModel,
    /// Upstream request timeout in seconds, used when a channel does not set its own.
    RequestTimeout,
    /// Upper bound applied to requested max_tokens.
    MaxTokensLimit,
    /// Default sampling temperature when the caller omits one.
    Temperature,
    /// Whether streaming responses are allowed at all.
    StreamEnabled,
    /// Whether outbound traffic goes through a proxy.
    ProxyEnabled,
    /// Proxy flavor: "http" or "socks5".
    ProxyType,
    /// HTTP proxy URL.
    HttpProxy,
    /// SOCKS5 proxy URL.
    Socks5Proxy,
    /// SOCKS5 username.
    Socks5ProxyUser,
    /// SOCKS5 password.
    Socks5ProxyPassword,
    /// Skip TLS certificate verification on outbound connections.
    IgnoreSslVerification,
}

impl ConfigKey {
    /// The canonical snake_case name of the key.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::OpenaiApiKey => "openai_api_key",
            ConfigKey::OpenaiBaseUrl => "openai_base_url",
            ConfigKey::ClaudeApiKey => "claude_api_key",
            ConfigKey::ClaudeBaseUrl => "claude_base_url",
            ConfigKey::BigModel => "big_model",
            ConfigKey::SmallModel => "small_model",
            ConfigKey::RequestTimeout => "request_timeout",
            ConfigKey::MaxTokensLimit => "max_tokens_limit",
            ConfigKey::Temperature => "temperature",
            ConfigKey::StreamEnabled => "stream_enabled",
            ConfigKey::ProxyEnabled => "proxy_enabled",
            ConfigKey::ProxyType => "proxy_type",
            ConfigKey::HttpProxy => "http_proxy",
            ConfigKey::Socks5Proxy => "socks5_proxy",
            ConfigKey::Socks5ProxyUser => "socks5_proxy_user",
            ConfigKey::Socks5ProxyPassword => "socks5_proxy_password",
            ConfigKey::IgnoreSslVerification => "ignore_ssl_verification",
        }
    }

    /// Environment variable consulted before the configuration document.
    pub fn env_var(self) -> String {
        format!("CCPROXY_{}", self.as_str().to_uppercase())
    }
}

/// Read access to typed configuration values.
///
/// The core never reads configuration files itself; it consumes whatever
/// implements this trait. [`crate::Config`] is the file-backed implementation,
/// tests provide their own.
pub trait ConfigProvider: Send + Sync {
    /// String-valued keys (models, URLs, credentials, proxy addresses).
    fn get_string(&self, key: ConfigKey) -> Option<String>;

    /// Boolean-valued keys.
    fn get_bool(&self, key: ConfigKey) -> Option<bool>;

    /// Integer-valued keys (timeouts, token limits).
    fn get_u64(&self, key: ConfigKey) -> Option<u64>;

    /// Float-valued keys (temperature).
    fn get_f32(&self, key: ConfigKey) -> Option<f32>;
}

/// Derived accessors with the documented defaults applied.
pub trait ConfigProviderExt: ConfigProvider {
    /// The alias substituted for heavy requests.
    fn big_model(&self) -> String {
        self.get_string(ConfigKey::BigModel)
            .unwrap_or_else(|| "gpt-4o".to_string())
    }

    /// The alias substituted for light requests.
    fn small_model(&self) -> String {
        self.get_string(ConfigKey::SmallModel)
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    /// Upstream timeout fallback in seconds.
    fn request_timeout(&self) -> u64 {
        self.get_u64(ConfigKey::RequestTimeout).unwrap_or(90)
    }

    /// Upper bound applied to requested max_tokens.
    fn max_tokens_limit(&self) -> u64 {
        self.get_u64(ConfigKey::MaxTokensLimit).unwrap_or(8192)
    }

    /// Whether streaming responses are allowed.
    fn stream_enabled(&self) -> bool {
        self.get_bool(ConfigKey::StreamEnabled).unwrap_or(true)
    }

    /// Default OpenAI-compatible key, if one is configured.
    fn openai_api_key(&self) -> Option<SecretString> {
        self.get_string(ConfigKey::OpenaiApiKey).map(SecretString::from)
    }

    /// Default Anthropic key, if one is configured.
    fn claude_api_key(&self) -> Option<SecretString> {
        self.get_string(ConfigKey::ClaudeApiKey).map(SecretString::from)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}
