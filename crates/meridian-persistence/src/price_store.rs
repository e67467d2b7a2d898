//! SQLite-backed price history provider

use crate::{repositories::IndexPriceRepository, Database};
use async_trait::async_trait;
use meridian_core::{PriceHistoryProvider, StoreError};
use rust_decimal::Decimal;

/// Serves index closes from the `index_prices` table
#[derive(Clone)]
pub struct SqlitePriceHistory {
    db: Database,
}

impl SqlitePriceHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PriceHistoryProvider for SqlitePriceHistory {
    async fn closing_prices(&self, symbol: &str, days: usize) -> Result<Vec<Decimal>, StoreError> {
        let limit = i64::try_from(days).unwrap_or(i64::MAX);
        let records = IndexPriceRepository::new(&self.db)
            .recent(symbol, limit)
            .await?;

        Ok(records.into_iter().map(|r| r.close).collect())
    }
}
