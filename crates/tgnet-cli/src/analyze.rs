use std::sync::Arc;
use std::time::Duration;

use tgnet_core::{AnalysisResult, AppConfig, SectionOutcome};
use tgnet_engine::{parse_analysis_types, AnalysisEngine};
use tokio_util::sync::CancellationToken;

/// Engine over the Postgres store, sized and limited from `config`.
pub(crate) fn build_engine(pool: sqlx::PgPool, config: &AppConfig) -> AnalysisEngine {
    let timeout = (config.analysis_timeout_secs > 0)
        .then(|| Duration::from_secs(config.analysis_timeout_secs));
    AnalysisEngine::new(
        Arc::new(tgnet_db::PgStore::new(pool)),
        config.analysis.clone(),
    )
    .with_workers(config.worker_concurrency)
    .with_timeout(timeout)
}

/// Analyse one channel, cancelling cleanly on ctrl-c.
///
/// # Errors
///
/// Returns an error for invalid arguments, unknown channels, cancellation,
/// or store failures.
pub(crate) async fn run_analyze(
    pool: sqlx::PgPool,
    config: &AppConfig,
    channel_id: i64,
    types: &[String],
    depth: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let types = parse_analysis_types(types)?;
    let engine = build_engine(pool, config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling analysis");
            on_interrupt.cancel();
        }
    });

    let result = engine.analyze_with(channel_id, &types, depth, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in render_result(&result) {
            println!("{line}");
        }
    }
    Ok(())
}

fn section_line<T>(
    label: &str,
    outcome: &SectionOutcome<T>,
    detail: impl Fn(&T) -> String,
) -> String {
    let status = match outcome {
        SectionOutcome::NotRequested => "not requested".to_string(),
        SectionOutcome::Completed { result } => format!("completed ({})", detail(result)),
        SectionOutcome::InsufficientData {
            required,
            available,
        } => format!("insufficient data (need {required} posts, have {available})"),
        SectionOutcome::Failed { reason } => format!("failed: {reason}"),
    };
    format!("{:<10}{status}", format!("{label}:"))
}

pub(crate) fn render_result(result: &AnalysisResult) -> Vec<String> {
    let summary = &result.relationship_summary;
    let mut lines = vec![
        format!(
            "channel {} analysed at {} (depth {})",
            result.channel_id,
            result.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            result.depth
        ),
        section_line("content", &result.content_analysis, |c| {
            format!(
                "{} posts, {:.1}% duplicates, {} peers",
                c.window_posts,
                c.duplicate_analysis.duplicate_rate * 100.0,
                c.peers.len()
            )
        }),
        section_line("temporal", &result.temporal_analysis, |t| {
            format!(
                "{} posts, peak hours {:?}, {} peers",
                t.posting_pattern.total_posts,
                t.posting_pattern.peak_hours,
                t.peers.len()
            )
        }),
        section_line("network", &result.network_analysis, |n| {
            format!(
                "rank #{} of {}, {} communities",
                n.metrics.rank,
                n.graph.nodes,
                n.communities.len()
            )
        }),
        format!(
            "connections: {} total, {} strong, confidence {:.2}",
            summary.total_connections, summary.strong_connections, summary.confidence_score
        ),
    ];
    if !summary.key_insights.is_empty() {
        lines.push("insights:".to_string());
        lines.extend(summary.key_insights.iter().map(|i| format!("  - {i}")));
    }
    lines
}
