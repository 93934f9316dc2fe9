//! Database operations for the `channels` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tgnet_core::{Channel, ChannelId};

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `channels` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub subscribers_count: i64,
    pub theme: Option<String>,
    pub verified: bool,
    pub last_post_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            name: row.name,
            username: row.username,
            subscribers_count: row.subscribers_count,
            theme: row.theme,
            verified: row.verified,
            created_at: row.created_at,
            last_post_at: row.last_post_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Returns a single channel by id, or `None` if not found.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_channel(pool: &PgPool, id: ChannelId) -> Result<Option<ChannelRow>, DbError> {
    let row = sqlx::query_as::<_, ChannelRow>(
        "SELECT id, username, name, subscribers_count, theme, verified, last_post_at, \
                created_at, updated_at \
         FROM channels \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns one page of channels ordered by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_channels(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<ChannelRow>, DbError> {
    let rows = sqlx::query_as::<_, ChannelRow>(
        "SELECT id, username, name, subscribers_count, theme, verified, last_post_at, \
                created_at, updated_at \
         FROM channels \
         ORDER BY id \
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Total number of tracked channels.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_channels(pool: &PgPool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM channels")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
