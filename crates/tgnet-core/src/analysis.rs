//! Analysis result contract returned by the orchestrator and stored as the
//! latest snapshot per channel.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChannelId, ConnectionType, CoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Content,
    Temporal,
    Network,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 3] = [
        AnalysisType::Content,
        AnalysisType::Temporal,
        AnalysisType::Network,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Content => "content",
            AnalysisType::Temporal => "temporal",
            AnalysisType::Network => "network",
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownAnalysisType(s.to_string()))
    }
}

/// Outcome of one analysis section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionOutcome<T> {
    NotRequested,
    Completed { result: T },
    InsufficientData { required: usize, available: usize },
    Failed { reason: String },
}

impl<T> SectionOutcome<T> {
    #[must_use]
    pub fn completed(&self) -> Option<&T> {
        match self {
            SectionOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        !matches!(self, SectionOutcome::NotRequested)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    Exact,
    Media,
    Textual,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub first_post_id: i64,
    pub second_post_id: i64,
    pub similarity: f64,
    pub time_diff_minutes: f64,
    pub kind: DuplicateKind,
}

/// Near-duplicates among the analysed channel's own posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateAnalysis {
    pub total_duplicates: usize,
    pub duplicate_rate: f64,
    pub examples: Vec<DuplicatePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerSimilarityOutcome {
    Compared {
        /// Absent when no post on either side reached the related floor.
        average_similarity: Option<f64>,
        max_similarity: f64,
        related_posts: usize,
        duplicate_posts: usize,
        connected: bool,
    },
    InsufficientData {
        required: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSimilarity {
    pub channel_id: ChannelId,
    pub channel_name: String,
    #[serde(flatten)]
    pub outcome: PeerSimilarityOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub window_posts: usize,
    pub duplicate_analysis: DuplicateAnalysis,
    pub keywords: Vec<String>,
    pub peers: Vec<PeerSimilarity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingPattern {
    pub total_posts: usize,
    /// Post counts per UTC hour of day, index 0..24.
    pub hourly_distribution: Vec<u32>,
    pub peak_hours: Vec<u32>,
    pub average_posts_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerCorrelationOutcome {
    Compared {
        correlation: Option<f64>,
        synchronized_posts: usize,
        channel_leads: usize,
        peer_leads: usize,
        mean_lag_minutes: Option<f64>,
        connected: bool,
    },
    InsufficientData {
        required: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCorrelation {
    pub channel_id: ChannelId,
    pub channel_name: String,
    #[serde(flatten)]
    pub outcome: PeerCorrelationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnalysis {
    pub posting_pattern: PostingPattern,
    pub peers: Vec<PeerCorrelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub degree: usize,
    pub weighted_degree: f64,
    pub degree_centrality: f64,
    pub betweenness_centrality: f64,
    /// `None` when the analysed subgraph is disconnected.
    pub closeness_centrality: Option<f64>,
    /// `None` when the power iteration did not converge.
    pub eigenvector_centrality: Option<f64>,
    pub clustering_coefficient: f64,
    pub importance: f64,
    /// 1-based position in the importance ranking of the analysed subgraph.
    pub rank: usize,
    pub neighbors: Vec<ChannelId>,
    pub connection_types: BTreeMap<ConnectionType, usize>,
    pub strong_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    pub members: Vec<ChannelId>,
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChannel {
    pub channel_id: ChannelId,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAnalysis {
    pub depth: u32,
    pub metrics: NodeMetrics,
    pub graph: GraphStats,
    pub communities: Vec<Community>,
    pub modularity: f64,
    pub top_channels: Vec<RankedChannel>,
    pub rank_iterations: usize,
    pub rank_converged: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub total_connections: usize,
    pub strong_connections: usize,
    pub connection_types: BTreeMap<ConnectionType, usize>,
    pub confidence_score: f64,
    pub key_insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub channel_id: ChannelId,
    pub analyzed_at: DateTime<Utc>,
    pub depth: u32,
    pub analysis_types: Vec<AnalysisType>,
    pub content_analysis: SectionOutcome<ContentAnalysis>,
    pub temporal_analysis: SectionOutcome<TemporalAnalysis>,
    pub network_analysis: SectionOutcome<NetworkAnalysis>,
    pub relationship_summary: RelationshipSummary,
}
