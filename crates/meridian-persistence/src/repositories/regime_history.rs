//! Regime history repository

use crate::{
    error::{PersistenceError, Result},
    Database,
};
use chrono::{DateTime, Utc};
use meridian_core::{DiscreteRegime, RegimeHistoryEntry};
use sqlx::{sqlite::SqliteRow, Row, Sqlite};

/// Repository for the append-only regime history
pub struct RegimeHistoryRepository<'a> {
    db: &'a Database,
}

impl<'a> RegimeHistoryRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append an entry, returning its row id
    pub async fn insert(&self, entry: &RegimeHistoryEntry) -> Result<i64> {
        Self::insert_with(self.db.pool(), entry).await
    }

    /// Most recent entry for a region
    pub async fn latest(&self, region: &str) -> Result<Option<RegimeHistoryEntry>> {
        Self::latest_with(self.db.pool(), region).await
    }

    /// Most recent entry for every region with history
    pub async fn latest_per_region(&self) -> Result<Vec<RegimeHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT h.* FROM regime_history h
            JOIN (
                SELECT region, MAX(id) AS max_id FROM regime_history GROUP BY region
            ) latest ON h.id = latest.max_id
            ORDER BY h.region ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Most recent entries first, at most `limit`
    pub async fn history(&self, region: &str, limit: i64) -> Result<Vec<RegimeHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM regime_history WHERE region = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(region)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Regions with at least one entry
    pub async fn regions(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT region FROM regime_history ORDER BY region ASC")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(|r| r.get("region")).collect())
    }

    /// Entry count for a region
    pub async fn count(&self, region: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM regime_history WHERE region = ?")
            .bind(region)
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.get::<i64, _>("count"))
    }

    /// Delete all but the most recent `keep` entries for a region
    pub async fn prune(&self, region: &str, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM regime_history
            WHERE region = ? AND id NOT IN (
                SELECT id FROM regime_history
                WHERE region = ?
                ORDER BY id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(region)
        .bind(region)
        .bind(keep)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub(crate) async fn insert_with<'e, E>(executor: E, entry: &RegimeHistoryEntry) -> Result<i64>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO regime_history
                (recorded_at, region, raw_score, smoothed_score, discrete_regime, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.recorded_at.timestamp())
        .bind(&entry.region)
        .bind(entry.raw_score)
        .bind(entry.smoothed_score)
        .bind(entry.discrete_regime.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub(crate) async fn latest_with<'e, E>(
        executor: E,
        region: &str,
    ) -> Result<Option<RegimeHistoryEntry>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "SELECT * FROM regime_history WHERE region = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(region)
        .fetch_optional(executor)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    fn row_to_entry(row: &SqliteRow) -> Result<RegimeHistoryEntry> {
        let recorded_at: i64 = row.get("recorded_at");
        let discrete: String = row.get("discrete_regime");

        Ok(RegimeHistoryEntry {
            id: Some(row.get("id")),
            recorded_at: DateTime::from_timestamp(recorded_at, 0).ok_or_else(|| {
                PersistenceError::InvalidValue {
                    column: "recorded_at".to_string(),
                    value: recorded_at.to_string(),
                }
            })?,
            region: row.get("region"),
            raw_score: row.get("raw_score"),
            smoothed_score: row.get("smoothed_score"),
            discrete_regime: discrete.parse::<DiscreteRegime>().map_err(|_| {
                PersistenceError::InvalidValue {
                    column: "discrete_regime".to_string(),
                    value: discrete.clone(),
                }
            })?,
        })
    }
}
