//! Market index registry repository

use crate::{
    error::{PersistenceError, Result},
    models::MarketIndexRecord,
    Database,
};
use chrono::{DateTime, Utc};
use meridian_core::{IndexKind, Region, RegionCatalog};
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::HashSet;
use tracing::info;

/// Repository materializing the static index catalog
pub struct MarketIndexRepository<'a> {
    db: &'a Database,
}

impl<'a> MarketIndexRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Upsert every catalog index; re-running never duplicates rows and keeps
    /// each row's `enabled` flag and `created_at`
    pub async fn sync_catalog(&self, catalog: &RegionCatalog) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.pool().begin().await?;

        for index in catalog.indices() {
            sqlx::query(
                r#"
                INSERT INTO market_indices
                    (symbol, name, market_code, region, kind, enabled, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 1, ?, ?)
                ON CONFLICT(symbol) DO UPDATE SET
                    name = excluded.name,
                    market_code = excluded.market_code,
                    region = excluded.region,
                    kind = excluded.kind,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&index.symbol)
            .bind(&index.name)
            .bind(&index.market_code)
            .bind(index.region.as_str())
            .bind(index.kind.to_string())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let synced = catalog.indices().len();
        info!(indices = synced, "Market index registry synced");
        Ok(synced)
    }

    /// Get an index by symbol
    pub async fn get(&self, symbol: &str) -> Result<Option<MarketIndexRecord>> {
        let row = sqlx::query("SELECT * FROM market_indices WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// All registered indices
    pub async fn list(&self) -> Result<Vec<MarketIndexRecord>> {
        let rows = sqlx::query("SELECT * FROM market_indices ORDER BY region ASC, symbol ASC")
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Enabled PRICE-kind indices for a region
    pub async fn list_enabled(&self, region: Region) -> Result<Vec<MarketIndexRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM market_indices
            WHERE region = ? AND kind = ? AND enabled = 1
            ORDER BY symbol ASC
            "#,
        )
        .bind(region.as_str())
        .bind(IndexKind::Price.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Symbols of every enabled index
    pub async fn enabled_symbols(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT symbol FROM market_indices WHERE enabled = 1")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(|r| r.get("symbol")).collect())
    }

    /// Enable or disable an index
    pub async fn set_enabled(&self, symbol: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE market_indices SET enabled = ?, updated_at = ? WHERE symbol = ?",
        )
        .bind(enabled)
        .bind(Utc::now().to_rfc3339())
        .bind(symbol)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("market index {}", symbol)));
        }

        Ok(())
    }

    /// Total registered index count
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM market_indices")
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.get::<i64, _>("count"))
    }

    fn row_to_record(row: &SqliteRow) -> Result<MarketIndexRecord> {
        let region: String = row.get("region");
        let kind: String = row.get("kind");

        Ok(MarketIndexRecord {
            symbol: row.get("symbol"),
            name: row.get("name"),
            market_code: row.get("market_code"),
            region: region.parse().map_err(|_| PersistenceError::InvalidValue {
                column: "region".to_string(),
                value: region.clone(),
            })?,
            kind: kind.parse().map_err(|_| PersistenceError::InvalidValue {
                column: "kind".to_string(),
                value: kind.clone(),
            })?,
            enabled: row.get::<bool, _>("enabled"),
            created_at: parse_timestamp(row.get("created_at")),
            updated_at: parse_timestamp(row.get("updated_at")),
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
