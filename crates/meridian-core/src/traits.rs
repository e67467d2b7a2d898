use crate::catalog::Region;
use crate::config::KellyParams;
use crate::error::{RegimeError, StoreError};
use crate::types::RegimeHistoryEntry;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Historical closing prices for index symbols
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Up to `days` most recent closes for a symbol, ordered oldest to newest
    async fn closing_prices(&self, symbol: &str, days: usize) -> Result<Vec<Decimal>, StoreError>;
}

/// Composite daily returns per region
#[async_trait]
pub trait ReturnsProvider: Send + Sync {
    /// Equal-weighted composite daily returns, ordered oldest to newest
    async fn returns_for_region(&self, region: Region, days: usize) -> Result<Vec<f64>, RegimeError>;
}

/// Append-only, per-region smoothed regime score store
///
/// Region keys are plain strings so legacy keys such as "GLOBAL" are stored
/// and smoothed exactly like any other region.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Smooth `raw` against the region's previous value and append a new entry
    async fn record_score(&self, region: &str, raw: f64) -> Result<RegimeHistoryEntry, StoreError>;

    /// Latest smoothed score, or neutral when the region has no history
    async fn current_score(&self, region: &str) -> Result<f64, StoreError>;

    /// Latest smoothed score for every region with at least one entry
    async fn all_current_scores(&self) -> Result<HashMap<String, f64>, StoreError>;

    /// Most recent entries first, at most `limit`
    async fn history(&self, region: &str, limit: usize) -> Result<Vec<RegimeHistoryEntry>, StoreError>;
}

/// Source of user-specific Kelly parameters
pub trait TemperamentProvider: Send + Sync {
    fn kelly_params(&self) -> KellyParams;
}
