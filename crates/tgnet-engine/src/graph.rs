//! Relationship graph builder: the only writer of connections.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use tgnet_core::{AnalysisConfig, ChannelId, Connection, ConnectionCandidate};

use crate::retry::retry_with_backoff;
use crate::store::{CommitSummary, ConnectionFilter, ConnectionStore};
use crate::EngineError;

pub struct GraphBuilder {
    store: Arc<dyn ConnectionStore>,
    max_retries: u32,
    backoff_ms: u64,
    staleness_days: u32,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(store: Arc<dyn ConnectionStore>, config: &AnalysisConfig) -> Self {
        Self {
            store,
            max_retries: config.max_commit_retries,
            backoff_ms: config.commit_backoff_ms,
            staleness_days: config.staleness_days,
        }
    }

    /// Upsert one detector's batch atomically, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] once retries are exhausted or on a
    /// non-transient failure. Nothing from the batch is stored in that case.
    pub async fn commit(
        &self,
        detector: &str,
        batch: &[ConnectionCandidate],
        now: DateTime<Utc>,
    ) -> Result<CommitSummary, EngineError> {
        if batch.is_empty() {
            return Ok(CommitSummary::default());
        }

        let summary = retry_with_backoff(self.max_retries, self.backoff_ms, || {
            self.store.commit(batch, now)
        })
        .await
        .map_err(|e| {
            tracing::error!(detector, edges = batch.len(), error = %e, "connection commit failed");
            EngineError::Store(e)
        })?;

        tracing::info!(
            detector,
            inserted = summary.inserted,
            updated = summary.updated,
            "connections committed"
        );
        Ok(summary)
    }

    /// Remove edges not refreshed within the staleness window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the delete fails.
    pub async fn prune_stale(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let cutoff = now - Duration::days(i64::from(self.staleness_days));
        let removed = self.store.prune_older_than(cutoff).await?;
        tracing::info!(removed, %cutoff, "stale connections pruned");
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn list(&self, filter: &ConnectionFilter) -> Result<Vec<Connection>, EngineError> {
        Ok(self.store.list_connections(filter).await?)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn incident(&self, channel_id: ChannelId) -> Result<Vec<Connection>, EngineError> {
        Ok(self.store.incident_connections(channel_id).await?)
    }

    /// Freeze the current graph for metric computation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<GraphSnapshot, EngineError> {
        let edges = self.store.all_connections().await?;
        Ok(GraphSnapshot::new(edges, now))
    }
}

/// Immutable view of the graph at one instant.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    taken_at: DateTime<Utc>,
    nodes: BTreeSet<ChannelId>,
    edges: Vec<Connection>,
}

impl GraphSnapshot {
    #[must_use]
    pub fn new(mut edges: Vec<Connection>, taken_at: DateTime<Utc>) -> Self {
        edges.sort_by_key(Connection::key);
        let nodes = edges
            .iter()
            .flat_map(|e| [e.key().source(), e.key().target()])
            .collect();
        Self {
            taken_at,
            nodes,
            edges,
        }
    }

    /// Ensure `id` is a node even when it has no edges.
    #[must_use]
    pub fn with_node(mut self, id: ChannelId) -> Self {
        self.nodes.insert(id);
        self
    }

    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    #[must_use]
    pub fn nodes(&self) -> &BTreeSet<ChannelId> {
        &self.nodes
    }

    /// Edges ordered by key.
    #[must_use]
    pub fn edges(&self) -> &[Connection] {
        &self.edges
    }

    /// Undirected adjacency, every node present.
    #[must_use]
    pub fn adjacency(&self) -> BTreeMap<ChannelId, BTreeSet<ChannelId>> {
        let mut adjacency: BTreeMap<ChannelId, BTreeSet<ChannelId>> =
            self.nodes.iter().map(|n| (*n, BTreeSet::new())).collect();
        for edge in &self.edges {
            let (s, t) = (edge.key().source(), edge.key().target());
            adjacency.entry(s).or_default().insert(t);
            adjacency.entry(t).or_default().insert(s);
        }
        adjacency
    }

    /// Induced subgraph of nodes reachable from `root` within `depth` hops,
    /// ignoring edge direction. `root` is always included.
    #[must_use]
    pub fn within(&self, root: ChannelId, depth: u32) -> GraphSnapshot {
        let adjacency = self.adjacency();
        let mut reached = BTreeSet::from([root]);
        let mut queue = VecDeque::from([(root, 0u32)]);
        while let Some((node, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for next in adjacency.get(&node).into_iter().flatten() {
                if reached.insert(*next) {
                    queue.push_back((*next, hops + 1));
                }
            }
        }

        let edges = self
            .edges
            .iter()
            .filter(|e| reached.contains(&e.key().source()) && reached.contains(&e.key().target()))
            .cloned()
            .collect();
        GraphSnapshot {
            taken_at: self.taken_at,
            nodes: reached,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use tgnet_core::{ConnectionType, Evidence};

    use super::*;

    fn edge(source: ChannelId, target: ChannelId, strength: f64) -> Connection {
        let candidate = ConnectionCandidate::new(
            source,
            target,
            ConnectionType::CrossPosting,
            strength,
            0.5,
            Evidence::Extension {
                payload: serde_json::json!({}),
            },
        )
        .unwrap();
        Connection::detected(candidate, Utc::now())
    }

    #[test]
    fn snapshot_orders_edges_by_key() {
        let snapshot = GraphSnapshot::new(vec![edge(3, 1, 0.5), edge(1, 2, 0.5)], Utc::now());
        let keys: Vec<_> = snapshot
            .edges()
            .iter()
            .map(|e| (e.key().source(), e.key().target()))
            .collect();
        assert_eq!(keys, vec![(1, 2), (3, 1)]);
        assert_eq!(snapshot.nodes().len(), 3);
    }

    #[test]
    fn within_limits_hops_and_ignores_direction() {
        // 1 -> 2 <- 3 -> 4 -> 5
        let snapshot = GraphSnapshot::new(
            vec![edge(1, 2, 0.5), edge(3, 2, 0.5), edge(3, 4, 0.5), edge(4, 5, 0.5)],
            Utc::now(),
        );
        let one_hop = snapshot.within(2, 1);
        assert_eq!(one_hop.nodes(), &BTreeSet::from([1, 2, 3]));
        assert_eq!(one_hop.edges().len(), 2);

        let two_hops = snapshot.within(2, 2);
        assert_eq!(two_hops.nodes(), &BTreeSet::from([1, 2, 3, 4]));
        assert_eq!(two_hops.edges().len(), 3);
    }

    #[test]
    fn isolated_root_is_kept() {
        let snapshot = GraphSnapshot::new(vec![edge(1, 2, 0.5)], Utc::now()).with_node(9);
        let sub = snapshot.within(9, 2);
        assert_eq!(sub.nodes(), &BTreeSet::from([9]));
        assert!(sub.edges().is_empty());
    }
}
