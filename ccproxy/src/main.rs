use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Context;
use args::Args;
use clap::Parser;
use config::{ConfigKey, ConfigProvider, ConfigProviderExt};
use proxy::{
    channel::{Channel, ChannelMetrics, InMemoryChannelStore},
    format::ApiFormat,
    logging::LogFacadeLogger,
};
use tokio::net::TcpListener;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_filter);

    let config = config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let listen_address = args.listen.unwrap_or(config.server.listen_address);
    let grace_period = Duration::from_secs(config.server.shutdown_grace_period);

    let store = Arc::new(InMemoryChannelStore::seeded(seed_channels(&config)));

    let transport = proxy::upstream::build_transport(&config.proxy)
        .map_err(|e| anyhow::anyhow!("failed to build HTTP transport: {e}"))?;

    let config: Arc<dyn ConfigProvider> = Arc::new(config);
    let request_logger = Arc::new(LogFacadeLogger);

    let (router, dispatcher) = proxy::router(config, store, request_logger, transport)
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize proxy: {e}"))?;

    let listener = TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind {listen_address}"))?;

    log::info!("ccproxy {} listening on {listen_address}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutdown signal received");
        })
        .await?;

    dispatcher.shutdown(grace_period).await;

    log::info!("ccproxy stopped");

    Ok(())
}

/// Channels declared in the configuration, plus one implicit channel per
/// configured default upstream when no explicit ones exist.
fn seed_channels(config: &config::Config) -> Vec<Channel> {
    let mut channels: Vec<Channel> = config.channels.iter().cloned().map(Channel::from).collect();

    if !channels.is_empty() {
        return channels;
    }

    if let Some(api_key) = config.openai_api_key() {
        channels.push(implicit_channel(
            "default-openai",
            ApiFormat::Openai,
            config
                .get_string(ConfigKey::OpenaiBaseUrl)
                .unwrap_or_else(|| proxy::endpoint::DEFAULT_OPENAI_API_URL.to_string()),
            api_key,
        ));
    }

    if let Some(api_key) = config.claude_api_key() {
        channels.push(implicit_channel(
            "default-anthropic",
            ApiFormat::Anthropic,
            config
                .get_string(ConfigKey::ClaudeBaseUrl)
                .unwrap_or_else(|| proxy::endpoint::DEFAULT_ANTHROPIC_API_URL.to_string()),
            api_key,
        ));
    }

    channels
}

fn implicit_channel(
    id: &str,
    provider: ApiFormat,
    base_url: String,
    api_key: secrecy::SecretString,
) -> Channel {
    Channel {
        id: id.to_string(),
        name: id.to_string(),
        provider,
        base_url,
        api_key,
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
