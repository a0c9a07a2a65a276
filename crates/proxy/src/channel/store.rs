//! Durable channel storage.
//!
//! The store is the source of truth; the manager's cache is reloaded from it
//! on startup and after each mutation. The in-memory implementation backs the
//! default binary (seeded from configuration) and the test suite; deployments
//! with an admin surface plug in their own.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Channel, ChannelMetrics};
use crate::error::{ProxyError, ProxyResult};

/// CRUD access to the durable channel set.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Every stored channel, enabled or not.
    async fn list_all(&self) -> ProxyResult<Vec<Channel>>;

    /// Insert a new channel. Fails on id or custom_key conflicts.
    async fn create(&self, channel: Channel) -> ProxyResult<Channel>;

    /// Replace an existing channel.
    async fn update(&self, channel: Channel) -> ProxyResult<Channel>;

    /// Remove a channel.
    async fn delete(&self, id: &str) -> ProxyResult<()>;

    /// Best-effort metrics write-back; the in-memory cache stays authoritative
    /// between reloads.
    async fn persist_metrics(&self, id: &str, metrics: ChannelMetrics) -> ProxyResult<()>;
}

/// Map-backed store used by the default binary and tests.
#[derive(Default)]
pub struct InMemoryChannelStore {
    rows: Mutex<HashMap<String, Channel>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with the given channels.
    pub fn seeded(channels: Vec<Channel>) -> Self {
        let rows = channels
            .into_iter()
            .map(|channel| (channel.id.clone(), channel))
            .collect();

        Self { rows: Mutex::new(rows) }
    }

    fn check_conflicts(rows: &HashMap<String, Channel>, candidate: &Channel) -> ProxyResult<()> {
        if let Some(key) = candidate.custom_key.as_deref() {
            let conflict = rows.values().any(|existing| {
                existing.id != candidate.id && existing.enabled && existing.custom_key.as_deref() == Some(key)
            });

            if candidate.enabled && conflict {
                return Err(ProxyError::InvalidRequest(format!(
                    "custom_key is already used by another enabled channel (channel '{}')",
                    candidate.id
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn list_all(&self) -> ProxyResult<Vec<Channel>> {
        let rows = self.rows.lock().expect("channel store poisoned");

        let mut channels: Vec<Channel> = rows.values().cloned().collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(channels)
    }

    async fn create(&self, channel: Channel) -> ProxyResult<Channel> {
        let mut rows = self.rows.lock().expect("channel store poisoned");

        if rows.contains_key(&channel.id) {
            return Err(ProxyError::InvalidRequest(format!(
                "channel '{}' already exists",
                channel.id
            )));
        }

        Self::check_conflicts(&rows, &channel)?;

        rows.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    async fn update(&self, channel: Channel) -> ProxyResult<Channel> {
        let mut rows = self.rows.lock().expect("channel store poisoned");

        if !rows.contains_key(&channel.id) {
            return Err(ProxyError::NotFound(format!("channel '{}' does not exist", channel.id)));
        }

        Self::check_conflicts(&rows, &channel)?;

        rows.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    async fn delete(&self, id: &str) -> ProxyResult<()> {
        let mut rows = self.rows.lock().expect("channel store poisoned");

        rows.remove(id)
            .map(|_| ())
            .ok_or_else(|| ProxyError::NotFound(format!("channel '{id}' does not exist")))
    }

    async fn persist_metrics(&self, id: &str, metrics: ChannelMetrics) -> ProxyResult<()> {
        let mut rows = self.rows.lock().expect("channel store poisoned");

        if let Some(channel) = rows.get_mut(id) {
            channel.metrics = metrics;
        }

        Ok(())
    }
}
