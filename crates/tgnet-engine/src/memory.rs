//! In-process store backing engine and router tests and embedding callers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use tgnet_core::{AnalysisResult, Channel, ChannelId, Connection, ConnectionCandidate, ConnectionKey, Post};

use crate::store::{
    sort_by_strength, ChannelRepository, CommitSummary, ConnectionFilter, ConnectionStats,
    ConnectionStore, PostSource, ResultStore,
};
use crate::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<ChannelId, Channel>>,
    posts: RwLock<BTreeMap<ChannelId, Vec<Post>>>,
    connections: RwLock<BTreeMap<ConnectionKey, Connection>>,
    results: RwLock<BTreeMap<ChannelId, AnalysisResult>>,
    failing_commits: AtomicU32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a channel.
    pub async fn put_channel(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    /// Append posts, keeping each channel's list ordered by time then id.
    pub async fn add_posts(&self, posts: impl IntoIterator<Item = Post> + Send) {
        let mut guard = self.posts.write().await;
        for post in posts {
            guard.entry(post.channel_id).or_default().push(post);
        }
        for list in guard.values_mut() {
            list.sort_by(|a, b| a.published_at.cmp(&b.published_at).then(a.id.cmp(&b.id)));
        }
    }

    /// Make the next `count` commits fail with a transient error.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChannelRepository for MemoryStore {
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<Channel>, StoreError> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_channels(&self) -> Result<usize, StoreError> {
        Ok(self.channels.read().await.len())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PostSource for MemoryStore {
    async fn recent_posts(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Post>, StoreError> {
        let guard = self.posts.read().await;
        let Some(posts) = guard.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let in_range: Vec<&Post> = posts
            .iter()
            .filter(|p| p.published_at >= since && p.published_at < until)
            .collect();
        let skip = in_range.len().saturating_sub(limit);
        Ok(in_range.into_iter().skip(skip).cloned().collect())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn commit(
        &self,
        batch: &[ConnectionCandidate],
        now: DateTime<Utc>,
    ) -> Result<CommitSummary, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected commit failure".to_string()));
        }

        // One write guard for the whole batch: readers see all of it or none.
        let mut guard = self.connections.write().await;
        let mut summary = CommitSummary::default();
        for candidate in batch {
            match guard.get_mut(&candidate.key()) {
                Some(existing) => {
                    existing.refresh(candidate.clone(), now);
                    summary.updated += 1;
                }
                None => {
                    guard.insert(candidate.key(), Connection::detected(candidate.clone(), now));
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn list_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<Connection>, StoreError> {
        let mut matching: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        sort_by_strength(&mut matching);
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn incident_connections(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Connection>, StoreError> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.key().involves(channel_id))
            .cloned()
            .collect())
    }

    async fn all_connections(&self) -> Result<Vec<Connection>, StoreError> {
        Ok(self.connections.read().await.values().cloned().collect())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut guard = self.connections.write().await;
        let before = guard.len();
        guard.retain(|_, c| c.last_updated >= cutoff);
        Ok(before - guard.len())
    }

    async fn connection_stats(&self) -> Result<ConnectionStats, StoreError> {
        let guard = self.connections.read().await;
        let mut stats = ConnectionStats {
            total: guard.len(),
            ..ConnectionStats::default()
        };
        for connection in guard.values() {
            *stats
                .by_type
                .entry(connection.key().connection_type())
                .or_default() += 1;
        }
        if !guard.is_empty() {
            let sum: f64 = guard.values().map(|c| c.strength.value()).sum();
            #[allow(clippy::cast_precision_loss)]
            let average = sum / guard.len() as f64;
            stats.average_strength = Some(average);
        }
        Ok(stats)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save_result(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        self.results
            .write()
            .await
            .insert(result.channel_id, result.clone());
        Ok(())
    }

    async fn latest_result(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(self.results.read().await.get(&channel_id).cloned())
    }

    async fn analyzed_channel_count(&self) -> Result<usize, StoreError> {
        Ok(self.results.read().await.len())
    }
}
