use anyhow::bail;
use tgnet_core::{AppConfig, ChannelId, Connection, ConnectionType};
use tgnet_engine::{ConnectionFilter, Overview};

use crate::analyze::build_engine;

/// Validate `connections` flags into a store filter.
///
/// # Errors
///
/// Returns an error for an unknown connection type, a strength outside
/// `[0, 1]`, or a zero limit.
pub(crate) fn connection_filter(
    source: Option<ChannelId>,
    target: Option<ChannelId>,
    connection_type: Option<&str>,
    min_strength: Option<f64>,
    limit: usize,
) -> anyhow::Result<ConnectionFilter> {
    let connection_type = connection_type
        .map(str::parse::<ConnectionType>)
        .transpose()?;
    if let Some(min) = min_strength {
        if !(0.0..=1.0).contains(&min) {
            bail!("--min-strength must be within [0, 1], got {min}");
        }
    }
    if limit == 0 {
        bail!("--limit must be at least 1");
    }
    Ok(ConnectionFilter {
        source,
        target,
        connection_type,
        min_strength,
        limit: Some(limit),
    })
}

/// # Errors
///
/// Returns an error if the store read fails.
pub(crate) async fn run_connections(
    pool: sqlx::PgPool,
    config: &AppConfig,
    filter: &ConnectionFilter,
) -> anyhow::Result<()> {
    let connections = build_engine(pool, config).connections(filter).await?;
    if connections.is_empty() {
        println!("no connections match");
        return Ok(());
    }
    println!(
        "{:>8}  {:>8}  {:<18}  {:>8}  {:>10}  last updated",
        "source", "target", "type", "strength", "confidence"
    );
    for connection in &connections {
        println!("{}", connection_row(connection));
    }
    Ok(())
}

fn connection_row(connection: &Connection) -> String {
    let key = connection.key();
    format!(
        "{:>8}  {:>8}  {:<18}  {:>8}  {:>10}  {}",
        key.source(),
        key.target(),
        key.connection_type().as_str(),
        connection.strength.to_string(),
        connection.confidence.to_string(),
        connection.last_updated.format("%Y-%m-%d %H:%M")
    )
}

/// # Errors
///
/// Returns an error if any of the counting queries fail.
pub(crate) async fn run_stats(pool: sqlx::PgPool, config: &AppConfig) -> anyhow::Result<()> {
    let overview = build_engine(pool, config).overview().await?;
    for line in render_overview(&overview) {
        println!("{line}");
    }
    Ok(())
}

fn render_overview(overview: &Overview) -> Vec<String> {
    let mut lines = vec![
        format!(
            "channels:          {} ({} analysed)",
            overview.channels, overview.analyzed_channels
        ),
        format!("connections:       {}", overview.connections),
    ];
    for (connection_type, count) in &overview.connections_by_type {
        lines.push(format!("  {:<17}{count}", connection_type.as_str()));
    }
    lines.push(match overview.average_strength {
        Some(avg) => format!("average strength:  {avg:.3}"),
        None => "average strength:  n/a".to_string(),
    });
    lines
}

/// # Errors
///
/// Returns an error if the delete fails.
pub(crate) async fn run_prune(pool: sqlx::PgPool, config: &AppConfig) -> anyhow::Result<()> {
    let removed = build_engine(pool, config).prune_stale().await?;
    tracing::info!(
        removed,
        staleness_days = config.analysis.staleness_days,
        "stale connections pruned"
    );
    println!(
        "pruned {removed} connections older than {} days",
        config.analysis.staleness_days
    );
    Ok(())
}
