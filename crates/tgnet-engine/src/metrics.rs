//! Network metrics over an immutable [`GraphSnapshot`].
//!
//! Everything here is a pure function of the snapshot: nodes and edges are
//! visited in key order so repeated runs produce bit-identical floats.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tgnet_core::{
    AnalysisConfig, ChannelId, Community, GraphStats, NetworkAnalysis, NodeMetrics, RankedChannel,
};

use crate::graph::GraphSnapshot;

const TOP_CHANNELS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PageRank {
    pub scores: BTreeMap<ChannelId, f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl PageRank {
    /// Channels by score descending, ties by id ascending.
    #[must_use]
    pub fn ranking(&self) -> Vec<RankedChannel> {
        let mut ranked: Vec<RankedChannel> = self
            .scores
            .iter()
            .map(|(id, score)| RankedChannel {
                channel_id: *id,
                importance: *score,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then(a.channel_id.cmp(&b.channel_id))
        });
        ranked
    }
}

/// Strength-weighted PageRank.
///
/// Symmetric connection types contribute a link in both directions; nodes
/// without outgoing weight spread their mass uniformly. Iteration stops when
/// the L1 change drops below `tolerance` or after `max_iterations`. Scores
/// are normalised to sum to 1.
#[must_use]
pub fn pagerank(
    snapshot: &GraphSnapshot,
    damping: f64,
    tolerance: f64,
    max_iterations: usize,
) -> PageRank {
    let nodes: Vec<ChannelId> = snapshot.nodes().iter().copied().collect();
    let n = nodes.len();
    if n == 0 {
        return PageRank {
            scores: BTreeMap::new(),
            iterations: 0,
            converged: true,
        };
    }
    let index: BTreeMap<ChannelId, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut incoming: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut out_weight = vec![0.0_f64; n];
    for edge in snapshot.edges() {
        let weight = edge.strength.value();
        if weight <= 0.0 {
            continue;
        }
        let key = edge.key();
        let (Some(&s), Some(&t)) = (index.get(&key.source()), index.get(&key.target())) else {
            continue;
        };
        incoming[t].push((s, weight));
        out_weight[s] += weight;
        if key.connection_type().is_symmetric() {
            incoming[s].push((t, weight));
            out_weight[t] += weight;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let size = n as f64;
    let mut rank = vec![1.0 / size; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        let dangling: f64 = rank
            .iter()
            .zip(&out_weight)
            .filter(|(_, w)| **w <= 0.0)
            .map(|(r, _)| r)
            .sum();
        let base = (1.0 - damping) / size + damping * dangling / size;

        let next: Vec<f64> = incoming
            .iter()
            .map(|links| {
                base + damping
                    * links
                        .iter()
                        .map(|&(from, w)| rank[from] * w / out_weight[from])
                        .sum::<f64>()
            })
            .collect();

        let delta: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
        rank = next;
        iterations += 1;
        if delta < tolerance {
            converged = true;
            break;
        }
    }

    let total: f64 = rank.iter().sum();
    if total > 0.0 {
        for r in &mut rank {
            *r /= total;
        }
    }

    PageRank {
        scores: nodes.into_iter().zip(rank).collect(),
        iterations,
        converged,
    }
}

/// Fraction of a node's neighbour pairs that are themselves connected.
#[must_use]
pub fn clustering_coefficient(
    adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    node: ChannelId,
) -> f64 {
    let Some(neighbors) = adjacency.get(&node) else {
        return 0.0;
    };
    let k = neighbors.len();
    if k < 2 {
        return 0.0;
    }
    let neighbors: Vec<ChannelId> = neighbors.iter().copied().collect();
    let mut links = 0usize;
    for (i, u) in neighbors.iter().enumerate() {
        for w in &neighbors[i + 1..] {
            if adjacency.get(u).is_some_and(|adj| adj.contains(w)) {
                links += 1;
            }
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let coefficient = 2.0 * links as f64 / (k * (k - 1)) as f64;
    coefficient
}

fn pair_density(pairs: usize, nodes: usize) -> f64 {
    if nodes < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let density = pairs as f64 / (nodes * (nodes - 1) / 2) as f64;
    density
}

fn distinct_pairs(adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>) -> usize {
    adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
}

/// Connected components over edges with strength at least `threshold`.
/// Singletons are not communities. Ordered by smallest member.
#[must_use]
pub fn communities(snapshot: &GraphSnapshot, threshold: f64) -> Vec<Community> {
    let mut strong: BTreeMap<ChannelId, BTreeSet<ChannelId>> = BTreeMap::new();
    for edge in snapshot.edges() {
        if edge.strength.value() < threshold {
            continue;
        }
        let (s, t) = (edge.key().source(), edge.key().target());
        strong.entry(s).or_default().insert(t);
        strong.entry(t).or_default().insert(s);
    }

    let mut seen = BTreeSet::new();
    let mut found = Vec::new();
    for &start in strong.keys() {
        if !seen.insert(start) {
            continue;
        }
        let mut members = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in strong.get(&node).into_iter().flatten() {
                if seen.insert(*next) {
                    members.insert(*next);
                    queue.push_back(*next);
                }
            }
        }
        let internal = members
            .iter()
            .map(|m| strong.get(m).map_or(0, BTreeSet::len))
            .sum::<usize>()
            / 2;
        found.push(Community {
            id: found.len(),
            density: pair_density(internal, members.len()),
            members: members.into_iter().collect(),
        });
    }
    found
}

/// Newman modularity of a partition over the undirected, unweighted graph.
/// Nodes outside every community count as their own community.
#[must_use]
pub fn modularity(snapshot: &GraphSnapshot, communities: &[Community]) -> f64 {
    let adjacency = snapshot.adjacency();
    let m = distinct_pairs(&adjacency);
    if m == 0 {
        return 0.0;
    }

    let mut label: BTreeMap<ChannelId, usize> = BTreeMap::new();
    for community in communities {
        for member in &community.members {
            label.insert(*member, community.id);
        }
    }
    let mut next_label = communities.len();
    for node in adjacency.keys() {
        label.entry(*node).or_insert_with(|| {
            next_label += 1;
            next_label - 1
        });
    }

    let mut internal: BTreeMap<usize, usize> = BTreeMap::new();
    let mut degree: BTreeMap<usize, usize> = BTreeMap::new();
    for (node, neighbors) in &adjacency {
        let own = label[node];
        *degree.entry(own).or_default() += neighbors.len();
        for other in neighbors {
            if node < other && label[other] == own {
                *internal.entry(own).or_default() += 1;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let edges = m as f64;
    degree
        .iter()
        .map(|(c, d)| {
            #[allow(clippy::cast_precision_loss)]
            let l = internal.get(c).copied().unwrap_or(0) as f64;
            #[allow(clippy::cast_precision_loss)]
            let share = *d as f64 / (2.0 * edges);
            l / edges - share * share
        })
        .sum()
}

/// Hop distances from `source` to every reachable node.
fn hop_distances(
    adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    source: ChannelId,
) -> BTreeMap<ChannelId, usize> {
    let mut distance = BTreeMap::from([(source, 0usize)]);
    let mut queue = VecDeque::from([source]);
    while let Some(node) = queue.pop_front() {
        let next_hop = distance[&node] + 1;
        for next in adjacency.get(&node).into_iter().flatten() {
            if !distance.contains_key(next) {
                distance.insert(*next, next_hop);
                queue.push_back(*next);
            }
        }
    }
    distance
}

/// Normalised betweenness over unweighted shortest paths (Brandes).
///
/// Each node's share of shortest paths between other pairs, scaled by the
/// number of such pairs so a star's centre scores 1.
#[must_use]
pub fn betweenness_centrality(
    adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>,
) -> BTreeMap<ChannelId, f64> {
    let mut centrality: BTreeMap<ChannelId, f64> = adjacency.keys().map(|n| (*n, 0.0)).collect();
    let n = adjacency.len();

    for &source in adjacency.keys() {
        let mut order = Vec::with_capacity(n);
        let mut predecessors: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
        let mut paths: BTreeMap<ChannelId, f64> = BTreeMap::from([(source, 1.0)]);
        let mut distance: BTreeMap<ChannelId, usize> = BTreeMap::from([(source, 0)]);
        let mut queue = VecDeque::from([source]);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            let hops = distance[&node];
            let through = paths[&node];
            for &next in adjacency.get(&node).into_iter().flatten() {
                if !distance.contains_key(&next) {
                    distance.insert(next, hops + 1);
                    queue.push_back(next);
                }
                if distance[&next] == hops + 1 {
                    *paths.entry(next).or_insert(0.0) += through;
                    predecessors.entry(next).or_default().push(node);
                }
            }
        }

        let mut dependency: BTreeMap<ChannelId, f64> = BTreeMap::new();
        for &node in order.iter().rev() {
            let delta = dependency.get(&node).copied().unwrap_or(0.0);
            for &pred in predecessors.get(&node).into_iter().flatten() {
                *dependency.entry(pred).or_insert(0.0) += paths[&pred] / paths[&node] * (1.0 + delta);
            }
            if node != source {
                if let Some(c) = centrality.get_mut(&node) {
                    *c += delta;
                }
            }
        }
    }

    // Every unordered pair was counted from both ends.
    if n > 2 {
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for c in centrality.values_mut() {
            *c *= scale;
        }
    }
    centrality
}

/// `(n - 1)` over the sum of hop distances from `node`. `None` when the
/// graph is disconnected, where distances are undefined.
#[must_use]
pub fn closeness_centrality(
    adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    node: ChannelId,
) -> Option<f64> {
    if !adjacency.contains_key(&node) || !is_connected(adjacency) {
        return None;
    }
    let total: usize = hop_distances(adjacency, node).values().sum();
    if total == 0 {
        return Some(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let closeness = (adjacency.len() - 1) as f64 / total as f64;
    Some(closeness)
}

/// Strength-weighted eigenvector centrality by power iteration on `A + I`,
/// scaled to unit Euclidean norm. Edge direction is ignored and parallel
/// edges add up. `None` if the iteration does not settle within
/// `max_iterations`.
#[must_use]
pub fn eigenvector_centrality(
    snapshot: &GraphSnapshot,
    tolerance: f64,
    max_iterations: usize,
) -> Option<BTreeMap<ChannelId, f64>> {
    let nodes: Vec<ChannelId> = snapshot.nodes().iter().copied().collect();
    let n = nodes.len();
    if n == 0 {
        return Some(BTreeMap::new());
    }
    let index: BTreeMap<ChannelId, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for edge in snapshot.edges() {
        let key = edge.key();
        let (Some(&s), Some(&t)) = (index.get(&key.source()), index.get(&key.target())) else {
            continue;
        };
        *weights.entry((s, t)).or_insert(0.0) += edge.strength.value();
        *weights.entry((t, s)).or_insert(0.0) += edge.strength.value();
    }

    #[allow(clippy::cast_precision_loss)]
    let size = n as f64;
    let mut x = vec![1.0 / size; n];
    for _ in 0..max_iterations {
        let mut next = x.clone();
        for (&(from, to), w) in &weights {
            next[to] += x[from] * w;
        }
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= 0.0 {
            return None;
        }
        for v in &mut next {
            *v /= norm;
        }
        let delta: f64 = next.iter().zip(&x).map(|(a, b)| (a - b).abs()).sum();
        x = next;
        if delta < size * tolerance {
            return Some(nodes.into_iter().zip(x).collect());
        }
    }
    None
}

fn is_connected(adjacency: &BTreeMap<ChannelId, BTreeSet<ChannelId>>) -> bool {
    let Some(&start) = adjacency.keys().next() else {
        return true;
    };
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for next in adjacency.get(&node).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    seen.len() == adjacency.len()
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    damping: f64,
    tolerance: f64,
    max_iterations: usize,
    strong_threshold: f64,
    community_threshold: f64,
}

impl MetricsCalculator {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            damping: config.rank_damping,
            tolerance: config.rank_tolerance,
            max_iterations: config.rank_max_iterations,
            strong_threshold: config.strong_connection_threshold,
            community_threshold: config.community_edge_threshold,
        }
    }

    #[must_use]
    pub fn pagerank(&self, snapshot: &GraphSnapshot) -> PageRank {
        pagerank(snapshot, self.damping, self.tolerance, self.max_iterations)
    }

    /// Metrics for `root` within `depth` hops of it.
    #[must_use]
    pub fn compute(&self, snapshot: &GraphSnapshot, root: ChannelId, depth: u32) -> NetworkAnalysis {
        let sub = snapshot.within(root, depth);
        let adjacency = sub.adjacency();
        let n = sub.nodes().len();

        let rank = self.pagerank(&sub);
        let ranking = rank.ranking();
        let position = ranking
            .iter()
            .position(|r| r.channel_id == root)
            .map_or(ranking.len(), |p| p + 1);

        let neighbors: Vec<ChannelId> = adjacency
            .get(&root)
            .map(|adj| adj.iter().copied().collect())
            .unwrap_or_default();
        let incident: Vec<_> = sub.edges().iter().filter(|e| e.key().involves(root)).collect();

        let mut connection_types = BTreeMap::new();
        for edge in &incident {
            *connection_types.entry(edge.key().connection_type()).or_insert(0) += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let degree_centrality = if n > 1 {
            neighbors.len() as f64 / (n - 1) as f64
        } else {
            0.0
        };

        let betweenness = betweenness_centrality(&adjacency);
        let eigenvector = eigenvector_centrality(&sub, self.tolerance, self.max_iterations);

        let metrics = NodeMetrics {
            degree: neighbors.len(),
            weighted_degree: incident.iter().map(|e| e.strength.value()).sum(),
            degree_centrality,
            betweenness_centrality: betweenness.get(&root).copied().unwrap_or(0.0),
            closeness_centrality: closeness_centrality(&adjacency, root),
            eigenvector_centrality: eigenvector.and_then(|scores| scores.get(&root).copied()),
            clustering_coefficient: clustering_coefficient(&adjacency, root),
            importance: rank.scores.get(&root).copied().unwrap_or(0.0),
            rank: position,
            strong_connections: incident
                .iter()
                .filter(|e| e.strength.value() >= self.strong_threshold)
                .count(),
            neighbors,
            connection_types,
        };

        let found = communities(&sub, self.community_threshold);
        let modularity = modularity(&sub, &found);

        NetworkAnalysis {
            depth,
            metrics,
            graph: GraphStats {
                nodes: n,
                edges: sub.edges().len(),
                density: pair_density(distinct_pairs(&adjacency), n),
                is_connected: is_connected(&adjacency),
            },
            communities: found,
            modularity,
            top_channels: ranking.into_iter().take(TOP_CHANNELS).collect(),
            rank_iterations: rank.iterations,
            rank_converged: rank.converged,
        }
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
