//! End-to-end analysis runs against the in-memory store.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use tgnet_core::{
    AnalysisConfig, AnalysisType, Channel, ChannelId, ConnectionType, PeerSimilarityOutcome, Post,
    SectionOutcome,
};
use tgnet_engine::{
    AnalysisEngine, ChannelRepository, ConnectionFilter, ConnectionStore, EngineError, MemoryStore,
    ProgressEvent, ProgressKind, ProgressSink, ResultStore,
};

const ALPHA: ChannelId = 1;
const BRAVO: ChannelId = 2;
const TINY: ChannelId = 3;

fn channel(id: ChannelId, name: &str) -> Channel {
    Channel {
        id,
        name: name.to_string(),
        username: format!("{}_channel", name.to_lowercase()),
        subscribers_count: 5_000,
        theme: Some("news".to_string()),
        verified: false,
        created_at: Utc::now() - Duration::days(365),
        last_post_at: None,
    }
}

fn post(id: i64, channel_id: ChannelId, at: DateTime<Utc>, text: String) -> Post {
    Post {
        id,
        channel_id,
        text,
        published_at: at,
        media_hash: None,
    }
}

/// Alpha: 120 posts, Bravo: 118 posts, 20 of them the same stories, each
/// Bravo post a few minutes after its Alpha counterpart. Tiny: 3 posts.
async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (id, name) in [(ALPHA, "Alpha"), (BRAVO, "Bravo"), (TINY, "Tiny")] {
        store.put_channel(channel(id, name)).await;
    }

    let base = Utc::now() - Duration::days(5);
    let mut posts = Vec::new();
    for i in 0..100 {
        posts.push(post(
            i,
            ALPHA,
            base + Duration::minutes(i * 30),
            format!("north{i} river{i} valley{i} harbor{i}"),
        ));
    }
    for k in 0..20 {
        posts.push(post(
            1_000 + k,
            ALPHA,
            base + Duration::minutes(3_000 + k * 30),
            format!("Convoy{k} grain{k} export{k} port{k} storm{k}."),
        ));
    }
    for j in 0..98 {
        posts.push(post(
            5_000 + j,
            BRAVO,
            base + Duration::minutes(j * 30 + 7),
            format!("south{j} mountain{j} forest{j} desert{j}"),
        ));
    }
    for k in 0..20 {
        posts.push(post(
            6_000 + k,
            BRAVO,
            base + Duration::minutes(3_004 + k * 30),
            format!("convoy{k} grain{k} export{k} port{k} storm{k} #breaking https://t.me/bravo/{k}"),
        ));
    }
    // Well after everyone else so nothing lines up with it.
    for t in 0..3 {
        posts.push(post(
            9_000 + t,
            TINY,
            base + Duration::days(4) + Duration::minutes(t * 300),
            format!("tiny{t} update{t}"),
        ));
    }
    store.add_posts(posts).await;
    store
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        commit_backoff_ms: 1,
        ..AnalysisConfig::default()
    }
}

fn engine(store: &Arc<MemoryStore>) -> AnalysisEngine {
    AnalysisEngine::new(Arc::clone(store), config()).with_workers(2)
}

fn content_only() -> ConnectionFilter {
    ConnectionFilter {
        connection_type: Some(ConnectionType::ContentSimilarity),
        ..ConnectionFilter::default()
    }
}

#[tokio::test]
async fn near_duplicate_stories_create_one_strong_content_edge() {
    let store = seeded_store().await;
    let engine = engine(&store);

    let result = engine
        .analyze(ALPHA, &[AnalysisType::Content], None)
        .await
        .expect("analysis succeeds");

    let content = store.list_connections(&content_only()).await.unwrap();
    assert_eq!(content.len(), 1);
    let edge = &content[0];
    assert_eq!((edge.key().source(), edge.key().target()), (ALPHA, BRAVO));
    assert!(edge.strength.value() >= 0.7);

    let section = result.content_analysis.completed().expect("content completed");
    let bravo = section
        .peers
        .iter()
        .find(|p| p.channel_id == BRAVO)
        .expect("bravo compared");
    assert!(matches!(
        bravo.outcome,
        PeerSimilarityOutcome::Compared { connected: true, duplicate_posts: 20, .. }
    ));
    assert!(matches!(result.temporal_analysis, SectionOutcome::NotRequested));
    assert!(matches!(result.network_analysis, SectionOutcome::NotRequested));
}

#[tokio::test]
async fn one_shared_story_does_not_connect_unrelated_channels() {
    const DELTA: ChannelId = 4;
    let store = seeded_store().await;
    store.put_channel(channel(DELTA, "Delta")).await;
    let base = Utc::now() - Duration::days(5);
    let mut posts: Vec<Post> = (0..100)
        .map(|i| {
            post(
                20_000 + i,
                DELTA,
                base + Duration::minutes(i * 30 + 13),
                format!("east{i} lake{i} meadow{i} canyon{i}"),
            )
        })
        .collect();
    // Alpha's first shared story, reposted verbatim.
    posts.push(post(
        20_500,
        DELTA,
        base + Duration::minutes(3_011),
        "Convoy0 grain0 export0 port0 storm0.".to_string(),
    ));
    store.add_posts(posts).await;

    let result = engine(&store)
        .analyze(ALPHA, &[AnalysisType::Content], None)
        .await
        .expect("analysis succeeds");

    let content = store.list_connections(&content_only()).await.unwrap();
    assert_eq!(content.len(), 1);
    assert!(content[0].key().involves(BRAVO));

    let section = result.content_analysis.completed().expect("content completed");
    let delta = section
        .peers
        .iter()
        .find(|p| p.channel_id == DELTA)
        .expect("delta compared");
    assert!(matches!(
        delta.outcome,
        PeerSimilarityOutcome::Compared { connected: false, duplicate_posts: 1, .. }
    ));
}

#[tokio::test]
async fn repeated_and_reversed_runs_keep_one_edge_per_key() {
    let store = seeded_store().await;
    let engine = engine(&store);
    let types = [AnalysisType::Content, AnalysisType::Temporal];

    engine.analyze(ALPHA, &types, None).await.unwrap();
    let first = store.all_connections().await.unwrap();

    engine.analyze(BRAVO, &types, None).await.unwrap();
    engine.analyze(ALPHA, &types, None).await.unwrap();
    let last = store.all_connections().await.unwrap();

    assert_eq!(first.len(), last.len());
    for ty in [ConnectionType::ContentSimilarity, ConnectionType::TimeCorrelation] {
        let between = last
            .iter()
            .filter(|c| c.key().connection_type() == ty && c.key().involves(ALPHA) && c.key().involves(BRAVO))
            .count();
        assert_eq!(between, 1, "{ty} stored once");
    }

    for (before, after) in first.iter().zip(&last) {
        assert_eq!(before.key(), after.key());
        assert_eq!(before.first_detected, after.first_detected);
        assert!(after.last_updated >= before.last_updated);
        // Same posts, same scores.
        assert_eq!(before.strength, after.strength);
        assert_eq!(before.confidence, after.confidence);
    }
}

#[tokio::test]
async fn every_stored_score_is_in_unit_range() {
    let store = seeded_store().await;
    let engine = engine(&store);
    for id in [ALPHA, BRAVO, TINY] {
        engine.analyze(id, &AnalysisType::ALL, None).await.unwrap();
    }
    for connection in store.all_connections().await.unwrap() {
        assert!((0.0..=1.0).contains(&connection.strength.value()));
        assert!((0.0..=1.0).contains(&connection.confidence.value()));
    }
}

#[tokio::test]
async fn unknown_channel_is_not_found_without_side_effects() {
    let store = seeded_store().await;
    let engine = engine(&store);

    let err = engine
        .analyze(999, &AnalysisType::ALL, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(999)));
    assert!(store.all_connections().await.unwrap().is_empty());
    assert_eq!(store.analyzed_channel_count().await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let store = seeded_store().await;
    let engine = engine(&store);

    assert!(matches!(
        engine.analyze(ALPHA, &[], None).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.analyze(ALPHA, &[AnalysisType::Network], Some(0)).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.analyze(ALPHA, &[AnalysisType::Network], Some(6)).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_on_one_channel_are_serialised() {
    let store = seeded_store().await;
    let recorder = Arc::new(Recorder::default());
    let engine = Arc::new(engine(&store).with_progress(recorder.clone()));
    let types = [AnalysisType::Content, AnalysisType::Temporal, AnalysisType::Network];

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.analyze(ALPHA, &types, None).await })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.analyze(ALPHA, &types, None).await })
    };
    let a = first.await.unwrap().expect("first run");
    let b = second.await.unwrap().expect("second run");
    assert_eq!(a.channel_id, b.channel_id);

    // One run finishes before the other starts: no commit step of one run
    // falls between the other's start and completion.
    let kinds: Vec<ProgressKind> = recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.channel_id == ALPHA)
        .map(|e| e.kind)
        .filter(|k| matches!(k, ProgressKind::Started | ProgressKind::Completed))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ProgressKind::Started,
            ProgressKind::Completed,
            ProgressKind::Started,
            ProgressKind::Completed
        ]
    );

    let content = store.list_connections(&content_only()).await.unwrap();
    assert_eq!(content.len(), 1);
    assert!(!engine.is_running(ALPHA));
}

#[tokio::test]
async fn short_channel_skips_content_but_runs_temporal() {
    let store = seeded_store().await;
    let engine = engine(&store);

    let result = engine
        .analyze(TINY, &[AnalysisType::Content, AnalysisType::Temporal], None)
        .await
        .unwrap();

    assert_eq!(
        result.content_analysis,
        SectionOutcome::InsufficientData {
            required: 5,
            available: 3
        }
    );
    let temporal = result
        .temporal_analysis
        .completed()
        .expect("temporal proceeds with three posts");
    assert_eq!(temporal.posting_pattern.total_posts, 3);
    assert_eq!(temporal.peers.len(), 2);
}

#[tokio::test]
async fn network_section_reflects_committed_edges() {
    let store = seeded_store().await;
    let engine = engine(&store);

    let result = engine
        .analyze(ALPHA, &AnalysisType::ALL, Some(2))
        .await
        .unwrap();
    let network = result.network_analysis.completed().expect("network completed");
    assert_eq!(network.depth, 2);
    assert!(network.metrics.neighbors.contains(&BRAVO));
    let total: f64 = network.top_channels.iter().map(|r| r.importance).sum();
    assert!((total - 1.0).abs() < 1e-9);

    assert!(result.relationship_summary.total_connections >= 1);
    assert!(result.relationship_summary.strong_connections >= 1);
    assert!(result.relationship_summary.confidence_score > 0.0);

    let stored = store.latest_result(ALPHA).await.unwrap().expect("result saved");
    assert_eq!(stored, result);
}

#[tokio::test]
async fn cancelled_run_commits_nothing() {
    let store = seeded_store().await;
    let engine = engine(&store);
    let token = CancellationToken::new();
    token.cancel();

    let err = engine
        .analyze_with(ALPHA, &AnalysisType::ALL, None, token)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled(ALPHA)));
    assert!(store.all_connections().await.unwrap().is_empty());
    assert!(store.latest_result(ALPHA).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_without_running_analysis_reports_false() {
    let store = seeded_store().await;
    assert!(!engine(&store).cancel(ALPHA));
}

#[tokio::test]
async fn transient_commit_failures_are_retried() {
    let store = seeded_store().await;
    let engine = engine(&store);
    store.fail_next_commits(2);

    engine
        .analyze(ALPHA, &[AnalysisType::Content], None)
        .await
        .expect("retries absorb two failures");
    assert_eq!(store.list_connections(&content_only()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_surface_as_internal() {
    let store = seeded_store().await;
    let engine = engine(&store);
    store.fail_next_commits(10);

    let err = engine
        .analyze(ALPHA, &[AnalysisType::Content], None)
        .await
        .unwrap_err();
    assert!(err.is_internal());
    assert!(store.all_connections().await.unwrap().is_empty());
    assert!(store.latest_result(ALPHA).await.unwrap().is_none());
}

#[tokio::test]
async fn prune_keeps_fresh_edges() {
    let store = seeded_store().await;
    let engine = engine(&store);
    engine.analyze(ALPHA, &[AnalysisType::Content], None).await.unwrap();

    assert_eq!(engine.prune_stale().await.unwrap(), 0);
    assert_eq!(store.all_connections().await.unwrap().len(), 1);
}

#[tokio::test]
async fn overview_counts_channels_edges_and_results() {
    let store = seeded_store().await;
    let engine = engine(&store);
    engine.analyze(ALPHA, &[AnalysisType::Content], None).await.unwrap();

    let overview = engine.overview().await.unwrap();
    assert_eq!(overview.channels, store.count_channels().await.unwrap());
    assert_eq!(overview.connections, 1);
    assert_eq!(overview.connections_by_type[&ConnectionType::ContentSimilarity], 1);
    assert_eq!(overview.analyzed_channels, 1);
    assert!(overview.average_strength.unwrap() >= 0.7);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl ProgressSink for Recorder {
    fn emit(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn progress_runs_from_started_to_completed() {
    let store = seeded_store().await;
    let recorder = Arc::new(Recorder::default());
    let engine = engine(&store).with_progress(recorder.clone());

    engine.analyze(ALPHA, &AnalysisType::ALL, None).await.unwrap();

    let events = recorder.0.lock().unwrap();
    assert_eq!(events.first().map(|e| e.kind), Some(ProgressKind::Started));
    assert_eq!(events.last().map(|e| e.kind), Some(ProgressKind::Completed));
    let percents: Vec<u8> = events.iter().map(|e| e.progress).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
}
