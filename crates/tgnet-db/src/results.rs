//! Database operations for the `analysis_results` table.

use sqlx::PgPool;
use tgnet_core::{AnalysisResult, ChannelId};

use crate::DbError;

/// Append a result. The newest row per channel is what readers see.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the insert fails.
pub async fn save_result(pool: &PgPool, result: &AnalysisResult) -> Result<(), DbError> {
    let types: Vec<&str> = result.analysis_types.iter().map(|t| t.as_str()).collect();
    let depth = i32::try_from(result.depth)
        .map_err(|_| DbError::InvalidRow(format!("depth {} out of range", result.depth)))?;
    let payload = serde_json::to_value(result)?;

    sqlx::query(
        "INSERT INTO analysis_results (channel_id, analyzed_at, depth, analysis_types, result) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(result.channel_id)
    .bind(result.analyzed_at)
    .bind(depth)
    .bind(&types)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(())
}

/// The most recent result for a channel, if it was ever analysed.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the stored payload no longer
/// deserializes.
pub async fn latest_result(
    pool: &PgPool,
    channel_id: ChannelId,
) -> Result<Option<AnalysisResult>, DbError> {
    let payload = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT result \
         FROM analysis_results \
         WHERE channel_id = $1 \
         ORDER BY analyzed_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;

    payload
        .map(serde_json::from_value::<AnalysisResult>)
        .transpose()
        .map_err(|e| DbError::InvalidRow(format!("analysis result for channel {channel_id}: {e}")))
}

/// Number of distinct channels with at least one stored result.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn analyzed_channel_count(pool: &PgPool) -> Result<i64, DbError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT channel_id) FROM analysis_results")
            .fetch_one(pool)
            .await?;
    Ok(count)
}
