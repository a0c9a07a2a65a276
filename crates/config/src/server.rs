use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,

    /// Seconds in-flight streams are given to finish on shutdown.
    pub shutdown_grace_period: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 8082)),
            shutdown_grace_period: 30,
        }
    }
}
