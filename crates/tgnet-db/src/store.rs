//! Postgres-backed implementation of the engine's storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tgnet_core::{
    AnalysisResult, Channel, ChannelId, Connection, ConnectionCandidate, ConnectionType, Post,
};
use tgnet_engine::store::sort_by_strength;
use tgnet_engine::{
    ChannelRepository, CommitSummary, ConnectionFilter, ConnectionStats, ConnectionStore,
    PostSource, ResultStore, StoreError,
};

use crate::connections::{ConnectionQuery, ConnectionRow};
use crate::DbError;

// Serialization failure and deadlock: the transaction can simply be retried.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => classify_sqlx(e),
            DbError::InvalidRow(_) | DbError::Json(_) => StoreError::Corrupt(err.to_string()),
            DbError::NotFound | DbError::Migration(_) => StoreError::Backend(err.to_string()),
        }
    }
}

fn classify_sqlx(err: sqlx::Error) -> StoreError {
    let transient = match &err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code)),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    };
    if transient {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn restore_all(rows: Vec<ConnectionRow>) -> Result<Vec<Connection>, StoreError> {
    rows.into_iter()
        .map(|row| Connection::try_from(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl ChannelRepository for PgStore {
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
        let row = crate::channels::get_channel(&self.pool, id).await?;
        Ok(row.map(Channel::from))
    }

    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<Channel>, StoreError> {
        let rows = crate::channels::list_channels(&self.pool, to_i64(limit), to_i64(offset)).await?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    async fn count_channels(&self) -> Result<usize, StoreError> {
        Ok(to_usize(crate::channels::count_channels(&self.pool).await?))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PostSource for PgStore {
    async fn recent_posts(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Post>, StoreError> {
        let rows =
            crate::posts::recent_posts(&self.pool, channel_id, since, until, to_i64(limit)).await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }
}

#[async_trait]
impl ConnectionStore for PgStore {
    async fn commit(
        &self,
        batch: &[ConnectionCandidate],
        now: DateTime<Utc>,
    ) -> Result<CommitSummary, StoreError> {
        let (inserted, updated) =
            crate::connections::upsert_connections(&self.pool, batch, now).await?;
        Ok(CommitSummary { inserted, updated })
    }

    async fn list_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<Connection>, StoreError> {
        let query = ConnectionQuery {
            source: filter.source,
            target: filter.target,
            connection_type: filter.connection_type.map(|t| t.as_str()),
            min_strength: filter.min_strength,
            limit: filter.limit.map(to_i64),
        };
        let rows = crate::connections::list_connections(&self.pool, query).await?;
        let mut connections = restore_all(rows)?;
        sort_by_strength(&mut connections);
        Ok(connections)
    }

    async fn incident_connections(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Connection>, StoreError> {
        let rows = crate::connections::incident_connections(&self.pool, channel_id).await?;
        restore_all(rows)
    }

    async fn all_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let rows =
            crate::connections::list_connections(&self.pool, ConnectionQuery::default()).await?;
        restore_all(rows)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = crate::connections::prune_connections(&self.pool, cutoff).await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    async fn connection_stats(&self) -> Result<ConnectionStats, StoreError> {
        let (total, by_type, average_strength) =
            crate::connections::connection_stats(&self.pool).await?;
        let mut stats = ConnectionStats {
            total: to_usize(total),
            average_strength,
            ..ConnectionStats::default()
        };
        for (name, count) in by_type {
            let connection_type = name
                .parse::<ConnectionType>()
                .map_err(|e| StoreError::Corrupt(format!("connection type {name}: {e}")))?;
            stats.by_type.insert(connection_type, to_usize(count));
        }
        Ok(stats)
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn save_result(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        crate::results::save_result(&self.pool, result).await?;
        Ok(())
    }

    async fn latest_result(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(crate::results::latest_result(&self.pool, channel_id).await?)
    }

    async fn analyzed_channel_count(&self) -> Result<usize, StoreError> {
        Ok(to_usize(
            crate::results::analyzed_channel_count(&self.pool).await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_are_transient() {
        let err = StoreError::from(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_rows_are_not_retried() {
        let err = StoreError::from(DbError::Sqlx(sqlx::Error::RowNotFound));
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn invalid_rows_are_corrupt() {
        let err = StoreError::from(DbError::InvalidRow("connection 3: bad".to_string()));
        assert!(matches!(err, StoreError::Corrupt(ref m) if m.contains("connection 3")));
    }
}
