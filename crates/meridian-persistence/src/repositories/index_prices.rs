//! Index closing price repository

use crate::{
    error::{PersistenceError, Result},
    models::IndexPriceRecord,
    Database,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Repository for daily index closes
pub struct IndexPriceRepository<'a> {
    db: &'a Database,
}

impl<'a> IndexPriceRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert or replace a close for (symbol, date)
    pub async fn upsert(&self, record: &IndexPriceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_prices (symbol, trade_date, close)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol, trade_date) DO UPDATE SET close = excluded.close
            "#,
        )
        .bind(&record.symbol)
        .bind(record.trade_date.format(DATE_FORMAT).to_string())
        .bind(record.close.to_string())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Upsert many closes in one transaction
    pub async fn upsert_many(&self, records: &[IndexPriceRecord]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO index_prices (symbol, trade_date, close)
                VALUES (?, ?, ?)
                ON CONFLICT(symbol, trade_date) DO UPDATE SET close = excluded.close
                "#,
            )
            .bind(&record.symbol)
            .bind(record.trade_date.format(DATE_FORMAT).to_string())
            .bind(record.close.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The most recent `limit` closes, ordered oldest to newest
    pub async fn recent(&self, symbol: &str, limit: i64) -> Result<Vec<IndexPriceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM index_prices WHERE symbol = ? ORDER BY trade_date DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        let mut records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }

    /// Closes within an inclusive date range, oldest first
    pub async fn range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexPriceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM index_prices
            WHERE symbol = ? AND trade_date >= ? AND trade_date <= ?
            ORDER BY trade_date ASC
            "#,
        )
        .bind(symbol)
        .bind(start.format(DATE_FORMAT).to_string())
        .bind(end.format(DATE_FORMAT).to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    fn row_to_record(row: &SqliteRow) -> Result<IndexPriceRecord> {
        let date: String = row.get("trade_date");
        let close: String = row.get("close");

        Ok(IndexPriceRecord {
            symbol: row.get("symbol"),
            trade_date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|_| {
                PersistenceError::InvalidValue {
                    column: "trade_date".to_string(),
                    value: date.clone(),
                }
            })?,
            close: Decimal::from_str(&close).map_err(|_| PersistenceError::InvalidValue {
                column: "close".to_string(),
                value: close.clone(),
            })?,
        })
    }
}
