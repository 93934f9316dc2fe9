//! Database operations for the `channel_connections` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tgnet_core::{
    ChannelId, Connection, ConnectionCandidate, ConnectionKey, ConnectionType, Evidence, Score,
};

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `channel_connections` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectionRow {
    pub id: i64,
    pub source_channel_id: i64,
    pub target_channel_id: i64,
    pub connection_type: String,
    pub strength: f64,
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = DbError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        let invalid = |e: tgnet_core::CoreError| DbError::InvalidRow(format!("connection {}: {e}", row.id));
        let connection_type: ConnectionType = row.connection_type.parse().map_err(invalid)?;
        let key = ConnectionKey::new(row.source_channel_id, row.target_channel_id, connection_type)
            .map_err(invalid)?;
        let strength = Score::new(row.strength).map_err(invalid)?;
        let confidence = Score::new(row.confidence).map_err(invalid)?;
        let evidence: Evidence = serde_json::from_value(row.evidence.clone())
            .map_err(|e| DbError::InvalidRow(format!("connection {}: {e}", row.id)))?;
        Connection::restore(
            key,
            strength,
            confidence,
            evidence,
            row.first_detected,
            row.last_updated,
        )
        .map_err(invalid)
    }
}

const CONNECTION_COLUMNS: &str = "id, source_channel_id, target_channel_id, connection_type, \
     strength, confidence, evidence, first_detected, last_updated";

// Strength first, then the same key order the engine sorts by.
const STRENGTH_ORDER: &str = "ORDER BY strength DESC, source_channel_id, target_channel_id, \
     array_position(ARRAY['content_similarity', 'time_correlation', 'admin_overlap', 'cross_posting'], \
                    connection_type)";

/// Optional predicates for [`list_connections`]. `None` means "any".
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionQuery<'a> {
    pub source: Option<ChannelId>,
    pub target: Option<ChannelId>,
    pub connection_type: Option<&'a str>,
    pub min_strength: Option<f64>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Upsert a batch of candidates keyed on `(source, target, type)`.
///
/// Existing rows keep `first_detected`; strength, confidence, evidence and
/// `last_updated` are replaced. The whole batch commits or none of it does.
/// Returns `(inserted, updated)`.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any statement fails.
pub async fn upsert_connections(
    pool: &PgPool,
    batch: &[ConnectionCandidate],
    now: DateTime<Utc>,
) -> Result<(usize, usize), DbError> {
    let mut tx = pool.begin().await?;
    let (mut inserted, mut updated) = (0usize, 0usize);

    for candidate in batch {
        let key = candidate.key();
        let evidence = serde_json::to_value(candidate.evidence())?;

        // `xmax = 0` only for rows this statement inserted.
        let was_insert: bool = sqlx::query_scalar(
            "INSERT INTO channel_connections \
               (source_channel_id, target_channel_id, connection_type, strength, confidence, \
                evidence, first_detected, last_updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             ON CONFLICT (source_channel_id, target_channel_id, connection_type) DO UPDATE SET \
                 strength = EXCLUDED.strength, \
                 confidence = EXCLUDED.confidence, \
                 evidence = EXCLUDED.evidence, \
                 last_updated = EXCLUDED.last_updated \
             RETURNING (xmax = 0)",
        )
        .bind(key.source())
        .bind(key.target())
        .bind(key.connection_type().as_str())
        .bind(candidate.strength().value())
        .bind(candidate.confidence().value())
        .bind(evidence)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if was_insert {
            inserted += 1;
        } else {
            updated += 1;
        }
    }

    tx.commit().await?;
    Ok((inserted, updated))
}

/// Delete connections whose `last_updated` is before `cutoff`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn prune_connections(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM channel_connections WHERE last_updated < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Connections matching `query`, strongest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_connections(
    pool: &PgPool,
    query: ConnectionQuery<'_>,
) -> Result<Vec<ConnectionRow>, DbError> {
    let sql = format!(
        "SELECT {CONNECTION_COLUMNS} \
         FROM channel_connections \
         WHERE ($1::BIGINT IS NULL OR source_channel_id = $1) \
           AND ($2::BIGINT IS NULL OR target_channel_id = $2) \
           AND ($3::TEXT IS NULL OR connection_type = $3) \
           AND ($4::DOUBLE PRECISION IS NULL OR strength >= $4) \
         {STRENGTH_ORDER} \
         LIMIT $5"
    );
    let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
        .bind(query.source)
        .bind(query.target)
        .bind(query.connection_type)
        .bind(query.min_strength)
        .bind(query.limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Every connection with `channel_id` as either endpoint.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn incident_connections(
    pool: &PgPool,
    channel_id: ChannelId,
) -> Result<Vec<ConnectionRow>, DbError> {
    let sql = format!(
        "SELECT {CONNECTION_COLUMNS} \
         FROM channel_connections \
         WHERE source_channel_id = $1 OR target_channel_id = $1 \
         {STRENGTH_ORDER}"
    );
    let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
        .bind(channel_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Aggregate counts: `(total, per-type counts, average strength)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn connection_stats(
    pool: &PgPool,
) -> Result<(i64, Vec<(String, i64)>, Option<f64>), DbError> {
    let (total, average): (i64, Option<f64>) =
        sqlx::query_as("SELECT COUNT(*), AVG(strength) FROM channel_connections")
            .fetch_one(pool)
            .await?;

    let by_type = sqlx::query_as::<_, (String, i64)>(
        "SELECT connection_type, COUNT(*) \
         FROM channel_connections \
         GROUP BY connection_type \
         ORDER BY connection_type",
    )
    .fetch_all(pool)
    .await?;

    Ok((total, by_type, average))
}
