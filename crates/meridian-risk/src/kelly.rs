//! Adaptive Kelly position sizing
//!
//! For a continuous return distribution the growth-optimal fraction is
//!
//!   f* = (mu - r_f) / sigma^2
//!
//! The raw fraction is scaled by a multiplier that centers on half-Kelly and
//! moves with signal confidence and the market regime, cut further in bear
//! markets, and finally clamped to the configured position bounds.

use meridian_core::{
    ConfigError, CovarianceMatrix, KellyConfig, KellyParams, SizingError, TemperamentProvider,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confidence assumed for assets the confidence provider does not cover
const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Breakdown of one sizing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// Unscaled Kelly fraction; zero when there is no edge
    pub kelly_fraction: f64,
    /// Adaptive or fixed multiplier applied to the Kelly fraction
    pub multiplier: f64,
    /// Bear-market factor in [1 - max_reduction, 1]
    pub bear_factor: f64,
    /// kelly_fraction * multiplier * bear_factor
    pub raw_size: f64,
    /// raw_size clamped to [min_position_size, max_position_size]
    pub final_size: f64,
    /// Whether clamping changed the size
    pub clamped: bool,
}

/// Per-asset inputs for portfolio-wide sizing
#[derive(Debug, Clone)]
pub struct PortfolioInputs {
    /// Asset ids in covariance row order
    pub asset_ids: Vec<String>,
    pub expected_returns: HashMap<String, f64>,
    /// Signal confidence in [0, 1]
    pub confidences: HashMap<String, f64>,
    pub covariance: CovarianceMatrix,
}

/// Sizes for a whole portfolio; failed assets carry the minimum size
#[derive(Debug, Clone, Default)]
pub struct BatchSizing {
    pub sizes: HashMap<String, f64>,
    pub failures: Vec<(String, SizingError)>,
}

/// Kelly criterion position sizer
pub struct KellyPositionSizer {
    config: KellyConfig,
    temperament: Option<Arc<dyn TemperamentProvider>>,
}

impl KellyPositionSizer {
    pub fn new(config: KellyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            temperament: None,
        })
    }

    /// Take thresholds and ranges from a temperament provider instead of the config
    pub fn with_temperament(mut self, temperament: Arc<dyn TemperamentProvider>) -> Self {
        self.temperament = Some(temperament);
        self
    }

    /// Parameters in effect for the next calculation
    ///
    /// Temperament parameters that fail validation are ignored in favour of
    /// the configured ones.
    pub fn params(&self) -> KellyParams {
        let Some(provider) = &self.temperament else {
            return self.config.params.clone();
        };

        let params = provider.kelly_params();
        match params.validate() {
            Ok(()) => params,
            Err(e) => {
                warn!(error = %e, "Invalid temperament Kelly parameters, using configured ones");
                self.config.params.clone()
            }
        }
    }

    /// `(expected_return - risk_free_rate) / variance`, or zero without a
    /// positive edge or with variance at or below the epsilon floor
    pub fn kelly_fraction(&self, expected_return: f64, variance: f64) -> f64 {
        let edge = expected_return - self.config.risk_free_rate;
        if !edge.is_finite() || !variance.is_finite() {
            return 0.0;
        }
        if edge <= 0.0 || variance <= self.config.variance_epsilon {
            return 0.0;
        }
        edge / variance
    }

    /// Fraction-of-Kelly multiplier for a confidence and regime
    ///
    /// In fixed mode this is `fixed_fractional`. Otherwise it is
    /// `base + (confidence - 0.5) * 2 * confidence_range + regime_adjustment`
    /// clamped to the multiplier bounds, where the regime adjustment is
    /// `+regime_range` at or above the bull threshold, `-regime_range` at or
    /// below the bear threshold, and zero between them.
    pub fn adaptive_multiplier(&self, confidence: f64, regime_score: f64) -> f64 {
        let params = self.params();
        self.multiplier_with(&params, confidence, regime_score)
    }

    /// Scale a size down in bear markets
    ///
    /// The factor falls linearly from 1.0 at regime 0 to
    /// `1 - bear_max_reduction` at regime -1 and never goes lower.
    pub fn bear_market_adjustment(&self, size: f64, regime_score: f64) -> f64 {
        let params = self.params();
        size * bear_factor(&params, regime_score)
    }

    /// Clamp a size to the configured position bounds
    pub fn clamp_position_size(&self, size: f64) -> f64 {
        let params = self.params();
        clamp_size(&params, size)
    }

    /// Size a single position
    pub fn calculate_optimal_size(
        &self,
        expected_return: f64,
        variance: f64,
        confidence: f64,
        regime_score: f64,
    ) -> Result<SizingResult, SizingError> {
        for (name, value) in [
            ("expected_return", expected_return),
            ("variance", variance),
            ("confidence", confidence),
            ("regime_score", regime_score),
        ] {
            if !value.is_finite() {
                return Err(SizingError::InvalidInput(format!("{} is {}", name, value)));
            }
        }
        if variance < 0.0 {
            return Err(SizingError::InvalidInput(format!(
                "variance is negative: {}",
                variance
            )));
        }

        let params = self.params();
        let kelly_fraction = self.kelly_fraction(expected_return, variance);
        let multiplier = self.multiplier_with(&params, confidence, regime_score);
        let bear_factor = bear_factor(&params, regime_score);
        let raw_size = kelly_fraction * multiplier * bear_factor;
        let final_size = clamp_size(&params, raw_size);

        let result = SizingResult {
            kelly_fraction,
            multiplier,
            bear_factor,
            raw_size,
            final_size,
            clamped: final_size != raw_size,
        };

        debug!(
            expected_return,
            variance,
            confidence,
            regime_score,
            kelly_fraction,
            multiplier,
            bear_factor,
            final_size,
            "Calculated Kelly position size"
        );

        Ok(result)
    }

    /// Size one asset from portfolio inputs
    pub fn calculate_optimal_size_for_asset(
        &self,
        asset_id: &str,
        inputs: &PortfolioInputs,
        regime_score: f64,
    ) -> Result<SizingResult, SizingError> {
        let index = inputs
            .asset_ids
            .iter()
            .position(|id| id == asset_id)
            .ok_or_else(|| SizingError::UnknownAsset(asset_id.to_string()))?;

        let variance = inputs
            .covariance
            .variance(index)
            .ok_or(SizingError::IndexOutOfBounds {
                index,
                len: inputs.covariance.dim(),
            })?;
        if variance < 0.0 {
            return Err(SizingError::NegativeVariance {
                asset: asset_id.to_string(),
                variance,
            });
        }

        let expected_return = inputs
            .expected_returns
            .get(asset_id)
            .copied()
            .ok_or_else(|| SizingError::MissingExpectedReturn(asset_id.to_string()))?;
        let confidence = inputs
            .confidences
            .get(asset_id)
            .copied()
            .unwrap_or(NEUTRAL_CONFIDENCE);

        self.calculate_optimal_size(expected_return, variance, confidence, regime_score)
    }

    /// Size every asset; a failed asset gets the minimum size and the batch continues
    pub fn calculate_optimal_sizes_for_all(
        &self,
        inputs: &PortfolioInputs,
        regime_score: f64,
    ) -> BatchSizing {
        let min_size = self.params().min_position_size;
        let mut batch = BatchSizing::default();

        for asset_id in &inputs.asset_ids {
            match self.calculate_optimal_size_for_asset(asset_id, inputs, regime_score) {
                Ok(result) => {
                    batch.sizes.insert(asset_id.clone(), result.final_size);
                }
                Err(e) => {
                    warn!(
                        asset = %asset_id,
                        error = %e,
                        fallback_size = min_size,
                        "Position sizing failed, using minimum size"
                    );
                    batch.sizes.insert(asset_id.clone(), min_size);
                    batch.failures.push((asset_id.clone(), e));
                }
            }
        }

        info!(
            assets = inputs.asset_ids.len(),
            failed = batch.failures.len(),
            regime_score,
            "Calculated portfolio position sizes"
        );

        batch
    }

    fn multiplier_with(&self, params: &KellyParams, confidence: f64, regime_score: f64) -> f64 {
        if self.config.use_fixed_fraction {
            return params.fixed_fractional;
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let confidence_adjustment = (confidence - 0.5) * 2.0 * params.confidence_adjustment_range;

        let regime_adjustment = if regime_score >= params.bull_threshold {
            params.regime_adjustment_range
        } else if regime_score <= params.bear_threshold {
            -params.regime_adjustment_range
        } else {
            0.0
        };

        (params.base_multiplier + confidence_adjustment + regime_adjustment)
            .clamp(params.min_multiplier, params.max_multiplier)
    }
}

fn bear_factor(params: &KellyParams, regime_score: f64) -> f64 {
    if regime_score >= 0.0 || regime_score.is_nan() {
        return 1.0;
    }
    let reduction = params.bear_max_reduction.clamp(0.0, 1.0);
    1.0 - reduction * regime_score.abs().min(1.0)
}

fn clamp_size(params: &KellyParams, size: f64) -> f64 {
    size.clamp(params.min_position_size, params.max_position_size)
}
