//! Database operations for the `posts` table.
//!
//! Posts are written by the collector and never updated here; the engine only
//! reads them through [`recent_posts`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tgnet_core::{ChannelId, Post};

use crate::DbError;

/// A row from the `posts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub media_hash: Option<String>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            channel_id: row.channel_id,
            text: row.text,
            published_at: row.published_at,
            media_hash: row.media_hash,
        }
    }
}

/// A post as handed over by the collector.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel_id: ChannelId,
    pub message_id: i64,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub media_hash: Option<String>,
}

/// Returns the newest `limit` posts of a channel published in `[since, until)`,
/// oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn recent_posts(
    pool: &PgPool,
    channel_id: ChannelId,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PostRow>, DbError> {
    let rows = sqlx::query_as::<_, PostRow>(
        "SELECT id, channel_id, message_id, text, published_at, media_hash \
         FROM ( \
             SELECT id, channel_id, message_id, text, published_at, media_hash \
             FROM posts \
             WHERE channel_id = $1 AND published_at >= $2 AND published_at < $3 \
             ORDER BY published_at DESC, id DESC \
             LIMIT $4 \
         ) newest \
         ORDER BY published_at, id",
    )
    .bind(channel_id)
    .bind(since)
    .bind(until)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert posts, skipping messages already stored for their channel, and bump
/// each channel's `last_post_at`.
///
/// Returns the number of newly inserted posts. Runs in a single transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn insert_posts(pool: &PgPool, posts: &[NewPost]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for post in posts {
        let result = sqlx::query(
            "INSERT INTO posts (channel_id, message_id, text, published_at, media_hash) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (channel_id, message_id) DO NOTHING",
        )
        .bind(post.channel_id)
        .bind(post.message_id)
        .bind(&post.text)
        .bind(post.published_at)
        .bind(&post.media_hash)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
            sqlx::query(
                "UPDATE channels \
                 SET last_post_at = GREATEST(COALESCE(last_post_at, $2), $2), updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(post.channel_id)
            .bind(post.published_at)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}
