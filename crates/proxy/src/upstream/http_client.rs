//! Process-wide outbound transport.
//!
//! Exactly one reqwest client is built per proxy configuration and shared by
//! every adapter; reqwest clients are cheap to clone and safe for concurrent
//! use.

use std::time::Duration;

use config::{ProxyTransportConfig, ProxyType};
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret;

use crate::error::{ProxyError, ProxyResult};

/// Build the shared transport from proxy settings.
pub fn build_transport(config: &ProxyTransportConfig) -> ProxyResult<reqwest::Client> {
    let mut builder = default_builder();

    if config.enabled {
        let proxy = match config.proxy_type {
            Some(ProxyType::Http) | None => {
                let url = config.http_proxy.as_deref().ok_or_else(|| {
                    ProxyError::Internal(Some("proxy enabled but http_proxy is not set".to_string()))
                })?;

                reqwest::Proxy::all(url)
            }
            Some(ProxyType::Socks5) => {
                let url = config.socks5_proxy.as_deref().ok_or_else(|| {
                    ProxyError::Internal(Some("proxy enabled but socks5_proxy is not set".to_string()))
                })?;

                reqwest::Proxy::all(url).map(|proxy| match &config.socks5_proxy_user {
                    Some(user) => {
                        let password = config
                            .socks5_proxy_password
                            .as_ref()
                            .map(|password| password.expose_secret().to_string())
                            .unwrap_or_default();

                        proxy.basic_auth(user, &password)
                    }
                    None => proxy,
                })
            }
        }
        .map_err(|e| ProxyError::Internal(Some(format!("invalid proxy configuration: {e}"))))?;

        builder = builder.proxy(proxy);
    }

    if config.ignore_ssl_verification {
        log::warn!("TLS certificate verification is disabled for upstream connections");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| ProxyError::Internal(Some(format!("failed to build HTTP transport: {e}"))))
}

fn default_builder() -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        // Keep the connection pool fresh so upstream DNS changes are picked
        // up; request deadlines are enforced per call by the dispatcher.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_transport_builds() {
        build_transport(&ProxyTransportConfig::default()).unwrap();
    }

    #[test]
    fn enabled_proxy_without_url_is_rejected() {
        let config = ProxyTransportConfig {
            enabled: true,
            proxy_type: Some(ProxyType::Http),
            ..Default::default()
        };

        assert!(build_transport(&config).is_err());
    }

    #[test]
    fn socks5_transport_builds_with_auth() {
        let config = ProxyTransportConfig {
            enabled: true,
            proxy_type: Some(ProxyType::Socks5),
            socks5_proxy: Some("socks5://127.0.0.1:1080".to_string()),
            socks5_proxy_user: Some("user".to_string()),
            socks5_proxy_password: Some("secret".to_string().into()),
            ..Default::default()
        };

        build_transport(&config).unwrap();
    }
}
