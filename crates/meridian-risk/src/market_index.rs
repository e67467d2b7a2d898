//! Composite regional index returns
//!
//! A region's composite is the equal-weighted average of the daily returns of
//! every PRICE index in the region that has at least two valid closes. Series
//! are aligned on their most recent end and truncated to the shortest one.

use async_trait::async_trait;
use meridian_core::{PriceHistoryProvider, Region, RegionCatalog, RegimeError, ReturnsProvider};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces composite daily-return series per region
#[derive(Clone)]
pub struct MarketIndexService {
    catalog: RegionCatalog,
    prices: Arc<dyn PriceHistoryProvider>,
}

impl MarketIndexService {
    pub fn new(catalog: RegionCatalog, prices: Arc<dyn PriceHistoryProvider>) -> Self {
        Self { catalog, prices }
    }

    pub fn catalog(&self) -> &RegionCatalog {
        &self.catalog
    }

    /// Equal-weighted composite daily returns, oldest to newest
    pub async fn get_returns_for_region(
        &self,
        region: Region,
        days: usize,
    ) -> Result<Vec<f64>, RegimeError> {
        let indices = self.catalog.price_indices(region);
        if indices.is_empty() {
            return Err(RegimeError::NoIndices(region));
        }

        let mut series: Vec<Vec<f64>> = Vec::with_capacity(indices.len());
        for index in &indices {
            let closes = match self.prices.closing_prices(&index.symbol, days).await {
                Ok(closes) => closes,
                Err(e) => {
                    warn!(
                        region = %region,
                        symbol = %index.symbol,
                        error = %e,
                        "Failed to load index prices"
                    );
                    continue;
                }
            };

            match daily_returns(&closes) {
                Some(returns) => series.push(returns),
                None => debug!(
                    region = %region,
                    symbol = %index.symbol,
                    points = closes.len(),
                    "Index has fewer than two valid prices"
                ),
            }
        }

        let composite = equal_weight_composite(&series).ok_or_else(|| {
            RegimeError::NoData(format!("no usable index returns for region {}", region))
        })?;

        debug!(
            region = %region,
            contributing = series.len(),
            length = composite.len(),
            "Built composite returns"
        );

        Ok(composite)
    }
}

#[async_trait]
impl ReturnsProvider for MarketIndexService {
    async fn returns_for_region(&self, region: Region, days: usize) -> Result<Vec<f64>, RegimeError> {
        self.get_returns_for_region(region, days).await
    }
}

/// Simple returns between consecutive valid (positive, representable) closes
fn daily_returns(closes: &[Decimal]) -> Option<Vec<f64>> {
    let valid: Vec<f64> = closes
        .iter()
        .filter(|p| p.is_sign_positive() && !p.is_zero())
        .filter_map(|p| p.to_f64())
        .filter(|p| p.is_finite())
        .collect();

    if valid.len() < 2 {
        return None;
    }

    Some(valid.windows(2).map(|w| w[1] / w[0] - 1.0).collect())
}

/// Element-wise mean over tail-aligned series truncated to the shortest
fn equal_weight_composite(series: &[Vec<f64>]) -> Option<Vec<f64>> {
    let len = series.iter().map(Vec::len).min()?;
    if len == 0 {
        return None;
    }

    let count = series.len() as f64;
    let composite = (0..len)
        .map(|t| {
            series
                .iter()
                .map(|s| s[s.len() - len + t])
                .sum::<f64>()
                / count
        })
        .collect();

    Some(composite)
}
