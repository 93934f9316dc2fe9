use std::collections::BTreeMap;

use tgnet_core::{
    AnalysisConfig, ChannelId, Connection, ContentAnalysis, NetworkAnalysis, PeerCorrelationOutcome,
    PeerSimilarityOutcome, RelationshipSummary, SectionOutcome, TemporalAnalysis,
};

const HIGH_DUPLICATE_RATE: f64 = 0.1;

/// Strength-weighted mean confidence of `edges`; plain mean when every
/// strength is zero, `0.0` without edges.
pub(crate) fn aggregate_confidence(edges: &[Connection]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    let weight: f64 = edges.iter().map(|e| e.strength.value()).sum();
    if weight > 0.0 {
        edges
            .iter()
            .map(|e| e.strength.value() * e.confidence.value())
            .sum::<f64>()
            / weight
    } else {
        #[allow(clippy::cast_precision_loss)]
        let mean = edges.iter().map(|e| e.confidence.value()).sum::<f64>() / edges.len() as f64;
        mean
    }
}

pub(crate) fn summarize(
    config: &AnalysisConfig,
    channel_id: ChannelId,
    incident: &[Connection],
    content: &SectionOutcome<ContentAnalysis>,
    temporal: &SectionOutcome<TemporalAnalysis>,
    network: &SectionOutcome<NetworkAnalysis>,
) -> RelationshipSummary {
    let mut connection_types = BTreeMap::new();
    for edge in incident {
        *connection_types
            .entry(edge.key().connection_type())
            .or_insert(0) += 1;
    }
    let strong_connections = incident
        .iter()
        .filter(|e| e.strength.value() >= config.strong_connection_threshold)
        .count();

    let mut key_insights = Vec::new();

    if let Some(content) = content.completed() {
        let rate = content.duplicate_analysis.duplicate_rate;
        if rate > HIGH_DUPLICATE_RATE {
            key_insights.push(format!(
                "High duplicate content rate: {:.1}% of posts repeat earlier posts",
                rate * 100.0
            ));
        }
        let similar = content
            .peers
            .iter()
            .filter(|p| matches!(p.outcome, PeerSimilarityOutcome::Compared { connected: true, .. }))
            .count();
        if similar > 0 {
            key_insights.push(format!("Shares similar content with {similar} channel(s)"));
        }
    }

    if let Some(temporal) = temporal.completed() {
        let (correlated, in_sync) = temporal.peers.iter().fold((0, 0), |(c, s), p| match p.outcome {
            PeerCorrelationOutcome::Compared {
                correlation,
                synchronized_posts,
                ..
            } => (
                c + usize::from(correlation.is_some_and(|r| r >= config.time_correlation_threshold)),
                s + usize::from(synchronized_posts >= config.min_synchronized_posts),
            ),
            PeerCorrelationOutcome::InsufficientData { .. } => (c, s),
        });
        if correlated > 0 {
            key_insights.push(format!(
                "Posting schedule strongly correlated with {correlated} channel(s)"
            ));
        }
        if in_sync > 0 {
            key_insights.push(format!("Publishes in sync with {in_sync} channel(s)"));
        }
    }

    if let Some(network) = network.completed() {
        if network.graph.nodes > 1 && network.metrics.rank <= 3 {
            key_insights.push(format!(
                "Ranks #{} by importance among {} channels within {} hop(s)",
                network.metrics.rank, network.graph.nodes, network.depth
            ));
        }
        if let Some(community) = network
            .communities
            .iter()
            .find(|c| c.members.len() > 2 && c.members.contains(&channel_id))
        {
            key_insights.push(format!(
                "Part of a tightly linked cluster of {} channels",
                community.members.len()
            ));
        }
    }

    if strong_connections > 0 {
        key_insights.push(format!(
            "{strong_connections} strong connection(s) at strength >= {:.2}",
            config.strong_connection_threshold
        ));
    }

    RelationshipSummary {
        total_connections: incident.len(),
        strong_connections,
        connection_types,
        confidence_score: aggregate_confidence(incident),
        key_insights,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tgnet_core::{
        ConnectionCandidate, ConnectionType, DuplicateAnalysis, Evidence, TemporalEvidence,
    };

    use crate::graph::GraphSnapshot;
    use crate::metrics::MetricsCalculator;

    use super::*;

    fn correlated(source: i64, target: i64, strength: f64) -> Connection {
        let evidence = Evidence::Temporal(TemporalEvidence {
            source_posts: 10,
            target_posts: 10,
            bucket_minutes: 60,
            bucket_count: 168,
            correlation: Some(strength),
            synchronized_posts: 0,
            source_leads: 0,
            target_leads: 0,
            mean_lag_minutes: None,
        });
        let candidate = ConnectionCandidate::new(
            source,
            target,
            ConnectionType::TimeCorrelation,
            strength,
            0.5,
            evidence,
        )
        .unwrap();
        Connection::detected(candidate, Utc::now())
    }

    fn cluster_insight(config: &AnalysisConfig, root: i64) -> Option<String> {
        // A weak 1-2 edge hanging off a tight 2-3-4 triangle.
        let edges = vec![
            correlated(1, 2, 0.2),
            correlated(2, 3, 0.9),
            correlated(3, 4, 0.9),
            correlated(2, 4, 0.9),
        ];
        let snapshot = GraphSnapshot::new(edges.clone(), Utc::now());
        let network = MetricsCalculator::new(config).compute(&snapshot, root, 2);
        assert_eq!(network.communities.len(), 1);
        let incident: Vec<Connection> = edges.into_iter().filter(|e| e.key().involves(root)).collect();
        summarize(
            config,
            root,
            &incident,
            &SectionOutcome::NotRequested,
            &SectionOutcome::NotRequested,
            &SectionOutcome::Completed { result: network },
        )
        .key_insights
        .into_iter()
        .find(|i| i.contains("cluster"))
    }

    #[test]
    fn cluster_insight_needs_membership() {
        let config = AnalysisConfig::default();
        assert_eq!(cluster_insight(&config, 1), None);
        assert_eq!(
            cluster_insight(&config, 3).as_deref(),
            Some("Part of a tightly linked cluster of 3 channels")
        );
    }

    fn edge(target: i64, strength: f64, confidence: f64) -> Connection {
        let candidate = ConnectionCandidate::new(
            1,
            target,
            ConnectionType::CrossPosting,
            strength,
            confidence,
            Evidence::Extension {
                payload: serde_json::json!({}),
            },
        )
        .unwrap();
        Connection::detected(candidate, Utc::now())
    }

    #[test]
    fn confidence_is_strength_weighted() {
        let edges = vec![edge(2, 0.9, 1.0), edge(3, 0.1, 0.0)];
        assert!((aggregate_confidence(&edges) - 0.9).abs() < 1e-12);
        assert!(aggregate_confidence(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_strength_edges_fall_back_to_plain_mean() {
        let edges = vec![edge(2, 0.0, 0.4), edge(3, 0.0, 0.8)];
        assert!((aggregate_confidence(&edges) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn summary_counts_types_and_strong_edges() {
        let config = AnalysisConfig::default();
        let edges = vec![edge(2, 0.9, 0.5), edge(3, 0.4, 0.5)];
        let content = SectionOutcome::Completed {
            result: ContentAnalysis {
                window_posts: 20,
                duplicate_analysis: DuplicateAnalysis {
                    total_duplicates: 4,
                    duplicate_rate: 0.2,
                    examples: Vec::new(),
                },
                keywords: Vec::new(),
                peers: Vec::new(),
            },
        };
        let summary = summarize(
            &config,
            1,
            &edges,
            &content,
            &SectionOutcome::NotRequested,
            &SectionOutcome::NotRequested,
        );
        assert_eq!(summary.total_connections, 2);
        assert_eq!(summary.strong_connections, 1);
        assert_eq!(summary.connection_types[&ConnectionType::CrossPosting], 2);
        assert!(summary
            .key_insights
            .iter()
            .any(|i| i.starts_with("High duplicate content rate: 20.0%")));
    }
}
