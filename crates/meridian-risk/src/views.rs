//! Black-Litterman view generation
//!
//! Asset scores in [0, 1] become absolute views. Strong scores tilt the
//! expected return up, weak scores tilt it down, and the band between the
//! thresholds leaves the asset at equilibrium.

use meridian_core::{ConfigError, RiskModelError, View, ViewConfig};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Score midpoint that tilts neither way
const NEUTRAL_VIEW_SCORE: f64 = 0.5;

/// Builds views, the pick matrix P, and the view uncertainty matrix
#[derive(Debug, Clone, Default)]
pub struct ViewGenerator {
    config: ViewConfig,
}

impl ViewGenerator {
    pub fn new(config: ViewConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Absolute views for scored assets that have an expected return, ordered by asset id
    pub fn generate_views(
        &self,
        scores: &HashMap<String, f64>,
        expected_returns: &HashMap<String, f64>,
    ) -> Vec<View> {
        let mut assets: Vec<&String> = scores.keys().collect();
        assets.sort();

        let mut views = Vec::new();
        for asset in assets {
            let score = scores[asset];
            if !score.is_finite() {
                continue;
            }
            let Some(&expected_return) = expected_returns.get(asset) else {
                debug!(asset = %asset, "No expected return, skipping view");
                continue;
            };

            if score > self.config.positive_threshold {
                views.push(View::Absolute {
                    asset: asset.clone(),
                    expected_return: expected_return
                        + (score - NEUTRAL_VIEW_SCORE) * self.config.return_scale,
                    confidence: score,
                });
            } else if score < self.config.negative_threshold {
                views.push(View::Absolute {
                    asset: asset.clone(),
                    expected_return: expected_return
                        - (NEUTRAL_VIEW_SCORE - score) * self.config.return_scale,
                    confidence: 1.0 - score,
                });
            }
        }

        debug!(scored = scores.len(), views = views.len(), "Generated views");
        views
    }

    /// Views whose assets all belong to the universe
    pub fn views_for_universe(&self, views: &[View], universe: &[String]) -> Vec<View> {
        let universe: HashSet<&str> = universe.iter().map(String::as_str).collect();
        views
            .iter()
            .filter(|view| view.assets().iter().all(|a| universe.contains(a)))
            .cloned()
            .collect()
    }

    /// Pick matrix P: one row per view, one column per universe asset
    pub fn create_view_matrix(
        &self,
        views: &[View],
        universe: &[String],
    ) -> Result<Vec<Vec<f64>>, RiskModelError> {
        if views.is_empty() {
            return Err(RiskModelError::EmptyViews);
        }

        let columns: HashMap<&str, usize> = universe
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let column = |asset: &str| {
            columns
                .get(asset)
                .copied()
                .ok_or_else(|| RiskModelError::UnknownAsset(asset.to_string()))
        };

        views
            .iter()
            .map(|view| -> Result<Vec<f64>, RiskModelError> {
                let mut row = vec![0.0; universe.len()];
                match view {
                    View::Absolute { asset, .. } => {
                        row[column(asset)?] = 1.0;
                    }
                    View::Relative {
                        long_asset,
                        short_asset,
                        ..
                    } => {
                        row[column(long_asset)?] = 1.0;
                        row[column(short_asset)?] = -1.0;
                    }
                }
                Ok(row)
            })
            .collect()
    }

    /// View variance for a score; higher scores mean lower uncertainty
    pub fn calculate_view_uncertainty(&self, score: f64) -> f64 {
        if !score.is_finite() {
            return self.config.max_uncertainty;
        }
        (self.config.base_uncertainty * (1.0 - score))
            .clamp(self.config.min_uncertainty, self.config.max_uncertainty)
    }

    /// Diagonal uncertainty matrix Omega from each view's confidence
    pub fn uncertainty_matrix(&self, views: &[View]) -> Vec<Vec<f64>> {
        let n = views.len();
        let mut omega = vec![vec![0.0; n]; n];
        for (i, view) in views.iter().enumerate() {
            omega[i][i] = self.calculate_view_uncertainty(view.confidence());
        }
        omega
    }
}
