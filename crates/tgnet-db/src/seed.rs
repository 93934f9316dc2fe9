use sqlx::PgPool;
use tgnet_core::ChannelSeed;

use crate::DbError;

/// Upsert channels from the seed file, keyed on their canonical handle.
///
/// Returns the number of channels processed (inserted or updated).
/// All upserts run inside a single transaction; if any operation fails
/// the entire batch is rolled back.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_channels(pool: &PgPool, channels: &[ChannelSeed]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for channel in channels {
        let channel_id: i64 = sqlx::query_scalar(
            "INSERT INTO channels (username, name, subscribers_count, theme, verified) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (username) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 subscribers_count = EXCLUDED.subscribers_count, \
                 theme = EXCLUDED.theme, \
                 verified = EXCLUDED.verified, \
                 updated_at = NOW() \
             RETURNING id",
        )
        .bind(channel.handle())
        .bind(&channel.name)
        .bind(channel.subscribers_count)
        .bind(&channel.theme)
        .bind(channel.verified)
        .fetch_one(&mut *tx)
        .await?;

        tracing::debug!(channel_id, username = %channel.handle(), "seeded channel");
        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}
