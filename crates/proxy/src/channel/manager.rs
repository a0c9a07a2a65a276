//! In-memory channel cache with health-weighted selection.

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::{Channel, ChannelStore};
use crate::{
    error::{ProxyError, ProxyResult},
    format::ApiFormat,
};

/// Smoothing factor for the response-time EWMA.
const EWMA_ALPHA: f64 = 0.1;

/// Channels below this success rate are dropped from selection once off
/// probation.
const HEALTH_FLOOR: f64 = 0.5;

/// Holds the channel set, selects one per request, and feeds back per-call
/// metrics.
///
/// The cache is authoritative between reloads; the store is the durable source
/// of truth and is re-read on startup and after every mutation. The lock is
/// never held across I/O; selection clones a snapshot out.
pub struct ChannelManager {
    store: Arc<dyn ChannelStore>,
    cache: RwLock<HashMap<String, Channel>>,
}

impl ChannelManager {
    /// Build a manager and populate its cache from the store.
    pub async fn new(store: Arc<dyn ChannelStore>) -> ProxyResult<Self> {
        let manager = Self {
            store,
            cache: RwLock::new(HashMap::new()),
        };

        manager.reload().await?;

        Ok(manager)
    }

    /// Re-read every channel from the store.
    pub async fn reload(&self) -> ProxyResult<()> {
        let channels = self.store.list_all().await?;

        let mut cache = self.cache.write().expect("channel cache poisoned");
        *cache = channels
            .into_iter()
            .map(|channel| (channel.id.clone(), channel))
            .collect();

        log::debug!("Channel cache reloaded with {} channels", cache.len());

        Ok(())
    }

    /// Snapshot of every cached channel, sorted by id.
    pub fn snapshot(&self) -> Vec<Channel> {
        let cache = self.cache.read().expect("channel cache poisoned");

        let mut channels: Vec<Channel> = cache.values().cloned().collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));

        channels
    }

    /// Find the enabled channel a caller selected through its custom key.
    pub fn find_by_custom_key(&self, key: &str) -> Option<Channel> {
        if key.is_empty() {
            return None;
        }

        let cache = self.cache.read().expect("channel cache poisoned");

        cache
            .values()
            .find(|channel| channel.enabled && channel.custom_key.as_deref() == Some(key))
            .cloned()
    }

    /// Pick a channel for the given provider.
    ///
    /// A valid `preferred_id` short-circuits the scoring. Otherwise enabled
    /// channels of the provider compete on score; unhealthy ones are dropped
    /// unless still on probation.
    pub fn select(&self, provider: ApiFormat, preferred_id: Option<&str>) -> ProxyResult<Channel> {
        let cache = self.cache.read().expect("channel cache poisoned");

        if let Some(id) = preferred_id
            && let Some(channel) = cache.get(id)
            && channel.enabled
        {
            return Ok(channel.clone());
        }

        cache
            .values()
            .filter(|channel| channel.enabled && channel.provider == provider)
            .filter(|channel| channel.metrics.success_rate >= HEALTH_FLOOR || channel.on_probation())
            .max_by(|a, b| Self::rank(a, b))
            .cloned()
            .ok_or_else(|| ProxyError::NoChannelAvailable {
                provider: provider.to_string(),
            })
    }

    /// Ordering for selection: score, then priority, weight, success rate,
    /// and finally the lexicographically smaller id.
    fn rank(a: &Channel, b: &Channel) -> Ordering {
        a.score()
            .total_cmp(&b.score())
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.weight.cmp(&b.weight))
            .then_with(|| a.metrics.success_rate.total_cmp(&b.metrics.success_rate))
            // max_by keeps the later maximum, so order ids descending to let
            // the smaller id win ties.
            .then_with(|| b.id.cmp(&a.id))
    }

    /// Fold one call's outcome into the channel's metrics.
    ///
    /// Counters update atomically under the write lock; persistence to the
    /// store happens afterwards, fire-and-forget.
    pub fn record(&self, channel_id: &str, response_time_s: f64, tokens: u64, success: bool) {
        let snapshot = {
            let mut cache = self.cache.write().expect("channel cache poisoned");

            let Some(channel) = cache.get_mut(channel_id) else {
                log::debug!("Metrics for unknown channel '{channel_id}' dropped");
                return;
            };

            let metrics = &mut channel.metrics;

            metrics.request_count += 1;
            if !success {
                metrics.error_count += 1;
            }

            metrics.success_rate = 1.0 - metrics.error_count as f64 / metrics.request_count as f64;
            metrics.total_tokens += tokens;

            metrics.avg_response_time_s = if metrics.request_count == 1 {
                response_time_s
            } else {
                (1.0 - EWMA_ALPHA) * metrics.avg_response_time_s + EWMA_ALPHA * response_time_s
            };

            metrics.last_used_at = Some(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            );

            *metrics
        };

        let store = self.store.clone();
        let id = channel_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = store.persist_metrics(&id, snapshot).await {
                log::debug!("Failed to persist metrics for channel '{id}': {e}");
            }
        });
    }

    /// Create a channel in the store and refresh the cache.
    pub async fn create(&self, channel: Channel) -> ProxyResult<Channel> {
        let created = self.store.create(channel).await?;
        self.reload().await?;

        Ok(created)
    }

    /// Update a channel in the store and refresh the cache.
    pub async fn update(&self, channel: Channel) -> ProxyResult<Channel> {
        let updated = self.store.update(channel).await?;
        self.reload().await?;

        Ok(updated)
    }

    /// Delete a channel from the store and refresh the cache.
    pub async fn delete(&self, id: &str) -> ProxyResult<()> {
        self.store.delete(id).await?;
        self.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelMetrics, InMemoryChannelStore, test_channel};

    async fn manager_with(channels: Vec<Channel>) -> ChannelManager {
        let store = Arc::new(InMemoryChannelStore::seeded(channels));
        ChannelManager::new(store).await.unwrap()
    }

    fn with_metrics(id: &str, metrics: ChannelMetrics) -> Channel {
        let mut channel = test_channel(id, ApiFormat::Openai);
        channel.metrics = metrics;
        channel
    }

    #[tokio::test]
    async fn healthier_channel_wins() {
        let a = with_metrics(
            "a",
            ChannelMetrics {
                request_count: 100,
                error_count: 10,
                success_rate: 0.9,
                total_tokens: 0,
                avg_response_time_s: 2.0,
                last_used_at: None,
            },
        );
        let b = with_metrics(
            "b",
            ChannelMetrics {
                request_count: 100,
                error_count: 0,
                success_rate: 1.0,
                total_tokens: 0,
                avg_response_time_s: 1.0,
                last_used_at: None,
            },
        );

        assert!(b.score() > a.score());

        let manager = manager_with(vec![a, b]).await;
        let selected = manager.select(ApiFormat::Openai, None).unwrap();

        assert_eq!(selected.id, "b");
    }

    #[tokio::test]
    async fn unhealthy_channel_dropped_unless_on_probation() {
        let sick = with_metrics(
            "sick",
            ChannelMetrics {
                request_count: 50,
                error_count: 30,
                success_rate: 0.4,
                total_tokens: 0,
                avg_response_time_s: 1.0,
                last_used_at: None,
            },
        );

        let manager = manager_with(vec![sick]).await;
        let error = manager.select(ApiFormat::Openai, None).unwrap_err();
        assert!(matches!(error, ProxyError::NoChannelAvailable { .. }));

        // Same failure rate, but too few requests to judge.
        let newcomer = with_metrics(
            "newcomer",
            ChannelMetrics {
                request_count: 5,
                error_count: 3,
                success_rate: 0.4,
                total_tokens: 0,
                avg_response_time_s: 1.0,
                last_used_at: None,
            },
        );

        let manager = manager_with(vec![newcomer]).await;
        assert_eq!(manager.select(ApiFormat::Openai, None).unwrap().id, "newcomer");
    }

    #[tokio::test]
    async fn ties_break_to_smaller_id() {
        let manager = manager_with(vec![
            test_channel("beta", ApiFormat::Openai),
            test_channel("alpha", ApiFormat::Openai),
        ])
        .await;

        assert_eq!(manager.select(ApiFormat::Openai, None).unwrap().id, "alpha");
    }

    #[tokio::test]
    async fn preferred_id_short_circuits() {
        let mut low = test_channel("low", ApiFormat::Openai);
        low.priority = 1;

        let manager = manager_with(vec![low, test_channel("high", ApiFormat::Openai)]).await;

        assert_eq!(manager.select(ApiFormat::Openai, Some("low")).unwrap().id, "low");
    }

    #[tokio::test]
    async fn provider_filter_applies() {
        let manager = manager_with(vec![test_channel("claude", ApiFormat::Anthropic)]).await;

        assert!(manager.select(ApiFormat::Openai, None).is_err());
        assert!(manager.select(ApiFormat::Anthropic, None).is_ok());
    }

    #[tokio::test]
    async fn record_updates_counters_and_ewma() {
        let manager = manager_with(vec![test_channel("a", ApiFormat::Openai)]).await;

        manager.record("a", 2.0, 100, true);
        manager.record("a", 4.0, 50, false);

        let channel = manager.select(ApiFormat::Openai, None).unwrap();

        assert_eq!(channel.metrics.request_count, 2);
        assert_eq!(channel.metrics.error_count, 1);
        assert_eq!(channel.metrics.total_tokens, 150);
        assert!((channel.metrics.success_rate - 0.5).abs() < f64::EPSILON);
        // First sample seeds the EWMA, the second folds in at α = 0.1.
        assert!((channel.metrics.avg_response_time_s - (0.9 * 2.0 + 0.1 * 4.0)).abs() < 1e-9);
        assert!(channel.metrics.last_used_at.is_some());
    }

    #[tokio::test]
    async fn custom_key_lookup_skips_disabled() {
        let mut enabled = test_channel("a", ApiFormat::Openai);
        enabled.custom_key = Some("key-a".to_string());

        let mut disabled = test_channel("b", ApiFormat::Openai);
        disabled.custom_key = Some("key-b".to_string());
        disabled.enabled = false;

        let manager = manager_with(vec![enabled, disabled]).await;

        assert_eq!(manager.find_by_custom_key("key-a").unwrap().id, "a");
        assert!(manager.find_by_custom_key("key-b").is_none());
    }

    #[tokio::test]
    async fn mutation_reloads_cache() {
        let manager = manager_with(vec![]).await;

        manager.create(test_channel("fresh", ApiFormat::Openai)).await.unwrap();
        assert_eq!(manager.select(ApiFormat::Openai, None).unwrap().id, "fresh");

        manager.delete("fresh").await.unwrap();
        assert!(manager.select(ApiFormat::Openai, None).is_err());
    }
}
