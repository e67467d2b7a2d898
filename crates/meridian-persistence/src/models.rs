//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use meridian_core::{IndexKind, KnownIndex, Region};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Persisted market index registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndexRecord {
    pub symbol: String,
    pub name: String,
    pub market_code: String,
    pub region: Region,
    pub kind: IndexKind,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MarketIndexRecord {
    /// Back to the catalog representation
    pub fn to_known_index(&self) -> KnownIndex {
        KnownIndex {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            market_code: self.market_code.clone(),
            region: self.region,
            kind: self.kind,
        }
    }
}

/// One daily closing price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPriceRecord {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub close: Decimal,
}

impl IndexPriceRecord {
    pub fn new(symbol: &str, trade_date: NaiveDate, close: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            trade_date,
            close,
        }
    }
}
