//! Storage seams between the engine and its backends.
//!
//! The engine only talks to these traits. [`crate::MemoryStore`] implements
//! them in process; the Postgres adapter lives in `tgnet-db`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use tgnet_core::{AnalysisResult, Channel, ChannelId, Connection, ConnectionCandidate, ConnectionType, Post};

use crate::StoreError;

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError>;

    /// Channels ordered by id.
    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<Channel>, StoreError>;

    async fn count_channels(&self) -> Result<usize, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PostSource: Send + Sync {
    /// The newest `limit` posts of `channel_id` published in `[since, until)`,
    /// returned oldest first (ties by post id).
    async fn recent_posts(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Post>, StoreError>;
}

/// Counts reported by a batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Read-side filter for connection listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    pub source: Option<ChannelId>,
    pub target: Option<ChannelId>,
    pub connection_type: Option<ConnectionType>,
    pub min_strength: Option<f64>,
    pub limit: Option<usize>,
}

impl ConnectionFilter {
    #[must_use]
    pub fn matches(&self, connection: &Connection) -> bool {
        let key = connection.key();
        self.source.is_none_or(|s| key.source() == s)
            && self.target.is_none_or(|t| key.target() == t)
            && self
                .connection_type
                .is_none_or(|ty| key.connection_type() == ty)
            && self
                .min_strength
                .is_none_or(|min| connection.strength.value() >= min)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub by_type: BTreeMap<ConnectionType, usize>,
    pub average_strength: Option<f64>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Upsert a batch atomically: either every candidate is applied or none.
    ///
    /// Existing keys keep `first_detected`; everything else is replaced and
    /// `last_updated` becomes `now`.
    async fn commit(
        &self,
        batch: &[ConnectionCandidate],
        now: DateTime<Utc>,
    ) -> Result<CommitSummary, StoreError>;

    /// Matching connections ordered by strength descending, then key.
    async fn list_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<Connection>, StoreError>;

    /// Every connection with `channel_id` as source or target, ordered by key.
    async fn incident_connections(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Connection>, StoreError>;

    /// Every stored connection, ordered by key.
    async fn all_connections(&self) -> Result<Vec<Connection>, StoreError>;

    /// Delete connections whose `last_updated` is before `cutoff`.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn connection_stats(&self) -> Result<ConnectionStats, StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `result` as the latest for its channel, replacing any earlier one.
    async fn save_result(&self, result: &AnalysisResult) -> Result<(), StoreError>;

    async fn latest_result(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<AnalysisResult>, StoreError>;

    async fn analyzed_channel_count(&self) -> Result<usize, StoreError>;
}

/// Everything the orchestrator needs from one backend.
pub trait Store: ChannelRepository + PostSource + ConnectionStore + ResultStore {}

impl<T> Store for T where T: ChannelRepository + PostSource + ConnectionStore + ResultStore {}

/// Sort connections the way [`ConnectionStore::list_connections`] promises.
pub fn sort_by_strength(connections: &mut [Connection]) {
    connections.sort_by(|a, b| {
        b.strength
            .value()
            .total_cmp(&a.strength.value())
            .then_with(|| a.key().cmp(&b.key()))
    });
}
