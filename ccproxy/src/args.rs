use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// LLM API proxy translating between Anthropic, OpenAI, and Gemini wire
/// formats.
#[derive(Debug, Parser)]
#[command(name = "ccproxy", version)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "CCPROXY_CONFIG", default_value = "ccproxy.toml")]
    pub config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long, env = "CCPROXY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "proxy=debug".
    #[arg(long, env = "CCPROXY_LOG", default_value = "info")]
    pub log_filter: String,
}
