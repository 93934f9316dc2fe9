//! Live integration tests for tgnet-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/tgnet-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory. They need `DATABASE_URL` and are ignored by default:
//! run them with `cargo test -p tgnet-db -- --ignored`.

use chrono::{Duration, SubsecRound, Utc};
use tgnet_core::{
    AnalysisResult, AnalysisType, ChannelSeed, ConnectionCandidate, ConnectionType,
    ContentEvidence, Evidence, RelationshipSummary, SectionOutcome,
};
use tgnet_db::{
    analyzed_channel_count, count_channels, get_channel, insert_posts, latest_result,
    list_channels, recent_posts, save_result, seed_channels, NewPost, PgStore,
};
use tgnet_engine::{ConnectionFilter, ConnectionStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn seed(username: &str) -> ChannelSeed {
    ChannelSeed {
        username: username.to_string(),
        name: format!("Channel {username}"),
        subscribers_count: 100,
        theme: None,
        verified: false,
    }
}

async fn seeded_ids(pool: &sqlx::PgPool, usernames: &[&str]) -> Vec<i64> {
    let seeds: Vec<ChannelSeed> = usernames.iter().map(|u| seed(u)).collect();
    seed_channels(pool, &seeds)
        .await
        .expect("seed_channels failed");
    list_channels(pool, 100, 0)
        .await
        .expect("list_channels failed")
        .into_iter()
        .map(|row| row.id)
        .collect()
}

fn content_candidate(a: i64, b: i64, strength: f64) -> ConnectionCandidate {
    ConnectionCandidate::new(
        a,
        b,
        ConnectionType::ContentSimilarity,
        strength,
        0.5,
        Evidence::Content(ContentEvidence {
            source_posts: 10,
            target_posts: 12,
            compared_pairs: 120,
            related_posts: 6,
            average_similarity: strength,
            max_similarity: 1.0,
            duplicate_posts: 2,
            shared_media: 0,
        }),
    )
    .expect("valid candidate")
}

// ---------------------------------------------------------------------------
// Channels and posts
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a live Postgres via DATABASE_URL"]
async fn seeding_twice_updates_in_place(pool: sqlx::PgPool) {
    seed_channels(&pool, &[seed("@Alpha")])
        .await
        .expect("first seed failed");
    let mut renamed = seed("t.me/alpha");
    renamed.name = "Alpha Renamed".to_string();
    seed_channels(&pool, &[renamed])
        .await
        .expect("second seed failed");

    assert_eq!(count_channels(&pool).await.expect("count failed"), 1);
    let rows = list_channels(&pool, 10, 0).await.expect("list failed");
    assert_eq!(rows[0].username, "alpha");
    assert_eq!(rows[0].name, "Alpha Renamed");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a live Postgres via DATABASE_URL"]
async fn recent_posts_returns_newest_oldest_first(pool: sqlx::PgPool) {
    let ids = seeded_ids(&pool, &["alpha"]).await;
    // Postgres keeps microseconds; whole seconds compare exactly after a round trip.
    let base = Utc::now().trunc_subsecs(0) - Duration::hours(12);
    let posts: Vec<NewPost> = (0..6)
        .map(|i| NewPost {
            channel_id: ids[0],
            message_id: i,
            text: format!("post {i}"),
            published_at: base + Duration::hours(i),
            media_hash: None,
        })
        .collect();

    assert_eq!(insert_posts(&pool, &posts).await.expect("insert failed"), 6);
    // Re-ingesting the same messages is a no-op.
    assert_eq!(insert_posts(&pool, &posts).await.expect("insert failed"), 0);

    let rows = recent_posts(&pool, ids[0], base, Utc::now(), 3)
        .await
        .expect("recent_posts failed");
    let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["post 3", "post 4", "post 5"]);

    let channel = get_channel(&pool, ids[0])
        .await
        .expect("get_channel failed")
        .expect("channel exists");
    assert_eq!(channel.last_post_at, Some(posts[5].published_at));
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a live Postgres via DATABASE_URL"]
async fn commit_upserts_and_keeps_first_detected(pool: sqlx::PgPool) {
    let ids = seeded_ids(&pool, &["alpha", "bravo"]).await;
    let store = PgStore::new(pool.clone());
    let first = Utc::now() - Duration::days(2);
    let later = Utc::now();

    let summary = store
        .commit(&[content_candidate(ids[1], ids[0], 0.4)], first)
        .await
        .expect("first commit failed");
    assert_eq!((summary.inserted, summary.updated), (1, 0));

    let summary = store
        .commit(&[content_candidate(ids[0], ids[1], 0.9)], later)
        .await
        .expect("second commit failed");
    assert_eq!((summary.inserted, summary.updated), (0, 1));

    let all = store.all_connections().await.expect("list failed");
    assert_eq!(all.len(), 1);
    let edge = &all[0];
    assert_eq!(edge.key().source(), ids[0].min(ids[1]));
    assert!((edge.strength.value() - 0.9).abs() < 1e-9);
    assert!(edge.first_detected < edge.last_updated);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a live Postgres via DATABASE_URL"]
async fn prune_and_filter_connections(pool: sqlx::PgPool) {
    let ids = seeded_ids(&pool, &["alpha", "bravo", "charlie"]).await;
    let store = PgStore::new(pool.clone());
    let now = Utc::now();

    store
        .commit(&[content_candidate(ids[0], ids[1], 0.3)], now - Duration::days(40))
        .await
        .expect("old commit failed");
    store
        .commit(&[content_candidate(ids[1], ids[2], 0.8)], now)
        .await
        .expect("fresh commit failed");

    let strong = store
        .list_connections(&ConnectionFilter {
            min_strength: Some(0.5),
            ..ConnectionFilter::default()
        })
        .await
        .expect("filter failed");
    assert_eq!(strong.len(), 1);

    let removed = store
        .prune_older_than(now - Duration::days(30))
        .await
        .expect("prune failed");
    assert_eq!(removed, 1);

    let stats = store.connection_stats().await.expect("stats failed");
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_type[&ConnectionType::ContentSimilarity], 1);
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a live Postgres via DATABASE_URL"]
async fn latest_result_supersedes_earlier_ones(pool: sqlx::PgPool) {
    let ids = seeded_ids(&pool, &["alpha"]).await;
    let result = |depth: u32, analyzed_at| AnalysisResult {
        channel_id: ids[0],
        analyzed_at,
        depth,
        analysis_types: vec![AnalysisType::Network],
        content_analysis: SectionOutcome::NotRequested,
        temporal_analysis: SectionOutcome::NotRequested,
        network_analysis: SectionOutcome::Failed {
            reason: "graph unavailable".to_string(),
        },
        relationship_summary: RelationshipSummary::default(),
    };

    save_result(&pool, &result(1, Utc::now() - Duration::hours(1)))
        .await
        .expect("save failed");
    save_result(&pool, &result(3, Utc::now()))
        .await
        .expect("save failed");

    let latest = latest_result(&pool, ids[0])
        .await
        .expect("latest failed")
        .expect("result exists");
    assert_eq!(latest.depth, 3);
    assert_eq!(analyzed_channel_count(&pool).await.expect("count failed"), 1);
}
