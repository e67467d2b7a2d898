//! Market regime detection
//!
//! The raw score of a region blends two trend signals computed from its
//! composite daily returns, both in [-1, 1]:
//!
//!   trend   = tanh(sensitivity * cumulative_return)
//!   breadth = (up_days - down_days) / days
//!   raw     = weight * trend + (1 - weight) * breadth
//!
//! Persistently rising prices push both terms toward +1, falling prices toward
//! -1, and choppy or flat series leave the score near zero. Raw scores are
//! handed to the score store, which smooths them per region.

use futures::future::join_all;
use meridian_core::{
    global_average, RegimeConfig, RegimeError, RegimeHistoryEntry, Region, RegionCatalog,
    RegionScores, ReturnsProvider, ScoreStore, NEUTRAL_SCORE,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a batch calculation across all indexed regions
#[derive(Debug)]
pub struct BatchRegimeScores {
    /// Smoothed scores of the regions that succeeded, plus their average
    pub scores: RegionScores,
    /// Regions omitted from `scores` and why
    pub failures: Vec<(Region, RegimeError)>,
}

impl BatchRegimeScores {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Computes, persists, and serves per-region regime scores
pub struct MarketRegimeDetector {
    returns: Option<Arc<dyn ReturnsProvider>>,
    store: Arc<dyn ScoreStore>,
    catalog: RegionCatalog,
    config: RegimeConfig,
}

impl MarketRegimeDetector {
    pub fn new(store: Arc<dyn ScoreStore>, catalog: RegionCatalog, config: RegimeConfig) -> Self {
        Self {
            returns: None,
            store,
            catalog,
            config,
        }
    }

    /// Attach the composite returns source
    pub fn with_returns_provider(mut self, returns: Arc<dyn ReturnsProvider>) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Raw regime score of a return series, bounded to [-1, 1]
    pub fn compute_regime_score(&self, returns: &[f64]) -> f64 {
        let valid: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if valid.is_empty() {
            return NEUTRAL_SCORE;
        }

        let cumulative = valid.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
        let trend = (self.config.trend_sensitivity * cumulative).tanh();

        let up = valid.iter().filter(|r| **r > 0.0).count() as f64;
        let down = valid.iter().filter(|r| **r < 0.0).count() as f64;
        let breadth = (up - down) / valid.len() as f64;

        let weight = self.config.trend_weight;
        let score = weight * trend + (1.0 - weight) * breadth;

        if score.is_finite() {
            score.clamp(-1.0, 1.0)
        } else {
            NEUTRAL_SCORE
        }
    }

    /// Compute, persist, and return the freshly smoothed score for a region
    pub async fn calculate_regime_score_for_region(
        &self,
        region: Region,
        lookback_days: usize,
    ) -> Result<f64, RegimeError> {
        let returns_provider = self.returns.as_ref().ok_or_else(|| {
            RegimeError::Configuration("market index service not set".to_string())
        })?;

        if !self.catalog.region_has_indices(region) {
            return Err(RegimeError::NoIndices(region));
        }

        let returns = returns_provider
            .returns_for_region(region, lookback_days)
            .await?;
        let raw = self.compute_regime_score(&returns);

        debug!(
            region = %region,
            lookback_days,
            observations = returns.len(),
            raw_score = raw,
            "Computed raw regime score"
        );

        let entry = self.store.record_score(region.as_str(), raw).await?;
        Ok(entry.smoothed_score)
    }

    /// Score every indexed region concurrently; failures are logged and omitted
    pub async fn calculate_all_region_scores(&self, lookback_days: usize) -> BatchRegimeScores {
        let timeout_secs = self.config.region_timeout_secs;
        // Zero disables the per-region timeout
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let futures: Vec<_> = Region::INDEXED
            .iter()
            .copied()
            .filter(|region| self.catalog.region_has_indices(*region))
            .map(|region| async move {
                let calculation = self.calculate_regime_score_for_region(region, lookback_days);
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, calculation).await,
                    None => Ok(calculation.await),
                };

                match result {
                    Ok(Ok(score)) => (region, Ok(score)),
                    Ok(Err(e)) => {
                        warn!(region = %region, error = %e, "Regime calculation failed");
                        (region, Err(e))
                    }
                    Err(_) => {
                        warn!(region = %region, timeout_secs, "Regime calculation timed out");
                        (
                            region,
                            Err(RegimeError::Timeout {
                                region,
                                secs: timeout_secs,
                            }),
                        )
                    }
                }
            })
            .collect();

        let mut scores = BTreeMap::new();
        let mut failures = Vec::new();
        for (region, result) in join_all(futures).await {
            match result {
                Ok(score) => {
                    scores.insert(region, score);
                }
                Err(e) => failures.push((region, e)),
            }
        }

        let scores = RegionScores::from_scores(scores);

        info!(
            succeeded = scores.scores.len(),
            failed = failures.len(),
            global_average = scores.global_average,
            "Calculated regional regime scores"
        );

        BatchRegimeScores { scores, failures }
    }

    /// Current score applicable to a security listed in `region`
    ///
    /// Regions without dedicated indices fall back to the mean of the indexed
    /// regions that have history, or neutral when none do.
    pub async fn get_regime_score_for_security(&self, region: Region) -> Result<f64, RegimeError> {
        if self.catalog.region_has_indices(region) {
            return Ok(self.store.current_score(region.as_str()).await?);
        }

        let current = self.store.all_current_scores().await?;
        let available: BTreeMap<Region, f64> = Region::INDEXED
            .iter()
            .filter_map(|r| current.get(r.as_str()).map(|score| (*r, *score)))
            .collect();

        let fallback = global_average(&available);
        debug!(
            region = %region,
            contributing = available.len(),
            score = fallback,
            "Using cross-region fallback regime score"
        );

        Ok(fallback)
    }

    /// Current score of every indexed region plus the average of those with history
    pub async fn get_current_regime_scores(&self) -> Result<RegionScores, RegimeError> {
        let current = self.store.all_current_scores().await?;

        let mut scores = BTreeMap::new();
        let mut with_history = BTreeMap::new();
        for region in Region::INDEXED {
            match current.get(region.as_str()) {
                Some(score) => {
                    scores.insert(region, *score);
                    with_history.insert(region, *score);
                }
                None => {
                    scores.insert(region, NEUTRAL_SCORE);
                }
            }
        }

        Ok(RegionScores {
            scores,
            global_average: global_average(&with_history),
        })
    }

    /// Most recent history entries for a region, newest first
    pub async fn get_regime_history(
        &self,
        region: &str,
        limit: usize,
    ) -> Result<Vec<RegimeHistoryEntry>, RegimeError> {
        Ok(self.store.history(region, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meridian_core::{DiscreteRegime, StoreError};
    use memory::MemoryStore;
    use std::collections::HashMap;

    /// Minimal in-memory score store with the same EMA rule
    mod memory {
        use super::*;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct MemoryStore {
            pub rows: Mutex<Vec<RegimeHistoryEntry>>,
        }

        #[async_trait]
        impl ScoreStore for MemoryStore {
            async fn record_score(&self, region: &str, raw: f64) -> Result<RegimeHistoryEntry, StoreError> {
                let mut rows = self.rows.lock().unwrap();
                let previous = rows.iter().rev().find(|e| e.region == region);
                let smoothed = previous.map_or(raw, |p| 0.1 * raw + 0.9 * p.smoothed_score);
                let entry = RegimeHistoryEntry {
                    id: Some(rows.len() as i64 + 1),
                    recorded_at: chrono::Utc::now(),
                    region: region.to_string(),
                    raw_score: raw,
                    smoothed_score: smoothed,
                    discrete_regime: DiscreteRegime::from_score(smoothed, 0.3, -0.3),
                };
                rows.push(entry.clone());
                Ok(entry)
            }

            async fn current_score(&self, region: &str) -> Result<f64, StoreError> {
                let rows = self.rows.lock().unwrap();
                Ok(rows
                    .iter()
                    .rev()
                    .find(|e| e.region == region)
                    .map_or(NEUTRAL_SCORE, |e| e.smoothed_score))
            }

            async fn all_current_scores(&self) -> Result<HashMap<String, f64>, StoreError> {
                let rows = self.rows.lock().unwrap();
                let mut latest = HashMap::new();
                for e in rows.iter() {
                    latest.insert(e.region.clone(), e.smoothed_score);
                }
                Ok(latest)
            }

            async fn history(&self, region: &str, limit: usize) -> Result<Vec<RegimeHistoryEntry>, StoreError> {
                let rows = self.rows.lock().unwrap();
                Ok(rows
                    .iter()
                    .rev()
                    .filter(|e| e.region == region)
                    .take(limit)
                    .cloned()
                    .collect())
            }
        }
    }

    struct FixedReturns(HashMap<Region, Vec<f64>>);

    #[async_trait]
    impl ReturnsProvider for FixedReturns {
        async fn returns_for_region(&self, region: Region, _days: usize) -> Result<Vec<f64>, RegimeError> {
            self.0
                .get(&region)
                .cloned()
                .ok_or_else(|| RegimeError::NoData(format!("no returns for {}", region)))
        }
    }

    struct SlowReturns;

    #[async_trait]
    impl ReturnsProvider for SlowReturns {
        async fn returns_for_region(&self, region: Region, _days: usize) -> Result<Vec<f64>, RegimeError> {
            if region == Region::Eu {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(vec![0.01; 5])
        }
    }

    /// Rising returns delivered after a short wait
    struct DelayedReturns;

    #[async_trait]
    impl ReturnsProvider for DelayedReturns {
        async fn returns_for_region(&self, _region: Region, _days: usize) -> Result<Vec<f64>, RegimeError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![0.01; 5])
        }
    }

    fn detector(store: Arc<MemoryStore>) -> MarketRegimeDetector {
        MarketRegimeDetector::new(store, RegionCatalog::builtin(), RegimeConfig::default())
    }

    #[test]
    fn test_score_direction() {
        let d = detector(Arc::new(MemoryStore::default()));

        let rising = d.compute_regime_score(&[0.01; 10]);
        let falling = d.compute_regime_score(&[-0.01; 10]);
        let flat = d.compute_regime_score(&[0.0; 10]);
        let choppy = d.compute_regime_score(&[0.01, -0.01, 0.01, -0.01, 0.01, -0.01]);

        assert!(rising > 0.5);
        assert!(falling < -0.5);
        assert_eq!(flat, 0.0);
        assert!(choppy.abs() < 0.1);
    }

    #[test]
    fn test_score_is_bounded() {
        let d = detector(Arc::new(MemoryStore::default()));
        assert!(d.compute_regime_score(&[5.0; 50]) <= 1.0);
        assert!(d.compute_regime_score(&[-0.9; 50]) >= -1.0);
        assert_eq!(d.compute_regime_score(&[]), 0.0);
        assert_eq!(d.compute_regime_score(&[f64::NAN]), 0.0);
    }

    #[tokio::test]
    async fn test_missing_returns_provider() {
        let d = detector(Arc::new(MemoryStore::default()));
        let err = d
            .calculate_regime_score_for_region(Region::Us, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RegimeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_region_without_indices_is_rejected() {
        let d = detector(Arc::new(MemoryStore::default()))
            .with_returns_provider(Arc::new(FixedReturns(HashMap::new())));
        let err = d
            .calculate_regime_score_for_region(Region::Russia, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RegimeError::NoIndices(Region::Russia)));
    }

    #[tokio::test]
    async fn test_batch_omits_failed_regions() {
        let store = Arc::new(MemoryStore::default());
        let returns = HashMap::from([
            (Region::Us, vec![0.01; 10]),
            (Region::Eu, vec![-0.01; 10]),
        ]);
        let d = detector(Arc::clone(&store))
            .with_returns_provider(Arc::new(FixedReturns(returns)));

        let batch = d.calculate_all_region_scores(10).await;

        assert_eq!(batch.scores.scores.len(), 2);
        assert!(batch.scores.get(Region::Asia).is_none());
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, Region::Asia);

        let us = batch.scores.get(Region::Us).unwrap();
        let eu = batch.scores.get(Region::Eu).unwrap();
        assert!((batch.scores.global_average - (us + eu) / 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_timed_out_region_is_reported() {
        let store = Arc::new(MemoryStore::default());
        let config = RegimeConfig {
            region_timeout_secs: 1,
            ..RegimeConfig::default()
        };
        let d = MarketRegimeDetector::new(store.clone(), RegionCatalog::builtin(), config)
            .with_returns_provider(Arc::new(SlowReturns));

        let batch = d.calculate_all_region_scores(5).await;

        assert!(batch.scores.get(Region::Us).is_some());
        assert!(batch.scores.get(Region::Eu).is_none());
        assert!(matches!(
            batch.failures.as_slice(),
            [(Region::Eu, RegimeError::Timeout { .. })]
        ));
        assert!(store.history("EU", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_limit() {
        let store = Arc::new(MemoryStore::default());
        let config = RegimeConfig {
            region_timeout_secs: 0,
            ..RegimeConfig::default()
        };
        config.validate().unwrap();
        let d = MarketRegimeDetector::new(store.clone(), RegionCatalog::builtin(), config)
            .with_returns_provider(Arc::new(DelayedReturns));

        let batch = d.calculate_all_region_scores(5).await;

        assert!(batch.is_complete(), "failures: {:?}", batch.failures);
        assert_eq!(batch.scores.scores.len(), 3);
        assert!(batch.scores.global_average > 0.0);
    }

    #[tokio::test]
    async fn test_security_fallback_uses_indexed_mean() {
        let store = Arc::new(MemoryStore::default());
        store.record_score("US", 0.6).await.unwrap();
        let d = detector(Arc::clone(&store));

        assert!((d.get_regime_score_for_security(Region::Unknown).await.unwrap() - 0.6).abs() < 1e-12);

        store.record_score("EU", 0.2).await.unwrap();
        assert!((d.get_regime_score_for_security(Region::Russia).await.unwrap() - 0.4).abs() < 1e-12);
        assert!((d.get_regime_score_for_security(Region::Eu).await.unwrap() - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_security_fallback_without_history_is_neutral() {
        let d = detector(Arc::new(MemoryStore::default()));
        assert_eq!(d.get_regime_score_for_security(Region::MiddleEast).await.unwrap(), 0.0);
        assert_eq!(d.get_regime_score_for_security(Region::Asia).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_current_scores_cover_every_indexed_region() {
        let store = Arc::new(MemoryStore::default());
        store.record_score("US", 0.4).await.unwrap();
        store.record_score("EU", 0.2).await.unwrap();
        store.record_score("GLOBAL", 0.9).await.unwrap();
        let d = detector(Arc::clone(&store));

        let current = d.get_current_regime_scores().await.unwrap();
        assert_eq!(current.scores.len(), 3);
        assert_eq!(current.get(Region::Asia), Some(0.0));
        assert!((current.global_average - 0.3).abs() < 1e-12);

        let flat = current.to_flat_map();
        assert!(flat.contains_key("GLOBAL_AVERAGE"));
        assert!(!flat.contains_key("GLOBAL"));
    }

    #[tokio::test]
    async fn test_history_delegates_to_store() {
        let store = Arc::new(MemoryStore::default());
        store.record_score("ASIA", 0.1).await.unwrap();
        store.record_score("ASIA", 0.2).await.unwrap();
        let d = detector(Arc::clone(&store));

        let history = d.get_regime_history("ASIA", 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].raw_score, 0.2);
    }
}
