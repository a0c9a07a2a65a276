use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;

/// Outbound proxy transport configuration.
///
/// The transport is process-wide: exactly one reqwest client is built from
/// these settings and shared by every upstream adapter.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyTransportConfig {
    /// Whether outbound traffic goes through a proxy at all.
    pub enabled: bool,

    /// Which proxy flavor to use when enabled.
    pub proxy_type: Option<ProxyType>,

    /// HTTP proxy URL, e.g. `http://127.0.0.1:8080`.
    pub http_proxy: Option<String>,

    /// SOCKS5 proxy URL, e.g. `socks5://127.0.0.1:1080`.
    pub socks5_proxy: Option<String>,

    /// SOCKS5 username.
    pub socks5_proxy_user: Option<String>,

    /// SOCKS5 password.
    pub socks5_proxy_password: Option<SecretString>,

    /// Skip TLS certificate verification on outbound connections.
    pub ignore_ssl_verification: bool,
}

/// Supported proxy flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// Plain HTTP CONNECT proxy.
    Http,
    /// SOCKS5 proxy, with optional username/password auth.
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}
