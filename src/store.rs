//! DemandStore: durable demand history in SQLite.

use crate::features::{FeatureExtractor, FeatureVector};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("demand database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// One recorded elevator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    pub floor: i64,
    pub timestamp: DateTime<Utc>,
}

/// Demand history as parallel sequences, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<i64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// SQLite-backed demand log.
///
/// Cheap to clone; clones share the connection pool and extractor. Safe to
/// use from any number of tasks at once, SQLite serializes the writers.
#[derive(Clone)]
pub struct DemandStore {
    pool: SqlitePool,
    extractor: Arc<FeatureExtractor>,
}

impl DemandStore {
    /// Connect to (or create) the demand database at `path` and apply the schema.
    pub async fn connect(path: &Path, extractor: FeatureExtractor) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self {
            pool,
            extractor: Arc::new(extractor),
        })
    }

    pub fn extractor(&self) -> &Arc<FeatureExtractor> {
        &self.extractor
    }

    pub async fn insert(&self, floor: i64, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO demands (floor, demanded_at) VALUES (?, ?)")
            .bind(floor)
            .bind(timestamp.timestamp_micros())
            .execute(&self.pool)
            .await?;

        tracing::debug!(floor, %timestamp, "demand recorded");
        Ok(())
    }

    /// Every stored demand, oldest insertion first.
    pub async fn all(&self) -> Result<Vec<Demand>, StoreError> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT floor, demanded_at FROM demands ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(floor, micros)| {
                let timestamp = DateTime::from_timestamp_micros(micros)
                    .ok_or(StoreError::InvalidTimestamp(micros))?;
                Ok(Demand { floor, timestamp })
            })
            .collect()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM demands")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Full history as feature vectors and floor labels.
    ///
    /// Features are computed from each stored timestamp with this store's
    /// extractor, so they always match the vectors used at prediction time.
    pub async fn extract_all(&self) -> Result<TrainingSet, StoreError> {
        let demands = self.all().await?;
        let mut set = TrainingSet {
            features: Vec::with_capacity(demands.len()),
            labels: Vec::with_capacity(demands.len()),
        };
        for demand in demands {
            set.features.push(self.extractor.extract(&demand.timestamp));
            set.labels.push(demand.floor);
        }
        Ok(set)
    }

    /// Delete every demand strictly older than `cutoff`. Returns how many were removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM demands WHERE demanded_at < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove all history.
    pub async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM demands").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for DemandStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandStore")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

/// Timestamps are microseconds since the Unix epoch (UTC), so ordering and
/// the pruning cutoff compare as plain integers.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS demands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    floor INTEGER NOT NULL,
    demanded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_demands_demanded_at ON demands(demanded_at);
"#;
