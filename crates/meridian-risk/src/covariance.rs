//! Covariance estimation
//!
//! Inputs are asset-major: `returns[i]` is the return series of asset `i`,
//! oldest to newest, and every series must have the same length (see
//! [`RiskModelBuilder::align_return_series`]). Every estimator fills the upper
//! triangle and mirrors it, so outputs are symmetric by construction. None of
//! them guarantee positive-definiteness.

use meridian_core::{CovarianceMatrix, RiskModelConfig, RiskModelError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, RiskModelError>;

/// Ledoit-Wolf shrinkage output
#[derive(Debug, Clone, PartialEq)]
pub struct ShrinkageEstimate {
    pub matrix: CovarianceMatrix,
    /// Weight on the scaled-identity target, in [0, 1]
    pub intensity: f64,
    /// Average sample variance used as the target diagonal
    pub target_variance: f64,
}

/// Regime and time-decay weighted covariance output
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCovariance {
    pub matrix: CovarianceMatrix,
    /// Normalized observation weights, oldest first, summing to 1
    pub weights: Vec<f64>,
    /// (sum w)^2 / sum w^2
    pub effective_sample_size: f64,
    /// True when the effective sample size is below the configured minimum
    pub over_conditioned: bool,
}

/// A pair of assets whose correlation exceeds a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
}

/// Stateless covariance and correlation estimators
#[derive(Debug, Clone, Default)]
pub struct RiskModelBuilder {
    config: RiskModelConfig,
}

impl RiskModelBuilder {
    pub fn new(config: RiskModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskModelConfig {
        &self.config
    }

    /// Tail-align series of unequal length, keeping each one's most recent values
    pub fn align_return_series(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let len = series.iter().map(Vec::len).min().unwrap_or(0);
        series
            .iter()
            .map(|s| s[s.len() - len..].to_vec())
            .collect()
    }

    /// Unbiased (n - 1) sample covariance
    pub fn sample_covariance(&self, returns: &[Vec<f64>]) -> Result<CovarianceMatrix> {
        let observations = validate_returns(returns)?;
        if returns.is_empty() {
            return Ok(CovarianceMatrix::zeros(0));
        }

        let deviations = demean(returns, &vec![1.0 / observations as f64; observations]);
        let scale = 1.0 / (observations as f64 - 1.0);

        Ok(weighted_cross_products(&deviations, None, scale))
    }

    /// Ledoit-Wolf shrinkage toward a scaled identity
    ///
    /// The target is `avg_var * I`. The intensity is the estimated squared
    /// error of the sample matrix over its squared distance to the target,
    /// clamped to [0, 1]. The diagonal is floored at the configured variance
    /// floor so it stays strictly positive.
    pub fn ledoit_wolf(&self, returns: &[Vec<f64>]) -> Result<ShrinkageEstimate> {
        let sample = self.sample_covariance(returns)?;
        let n = sample.dim();
        if n == 0 {
            return Ok(ShrinkageEstimate {
                matrix: sample,
                intensity: 0.0,
                target_variance: 0.0,
            });
        }

        let observations = returns[0].len();
        let target_variance = (0..n).filter_map(|i| sample.variance(i)).sum::<f64>() / n as f64;

        let deviations = demean(returns, &vec![1.0 / observations as f64; observations]);
        let sample_rows = sample.rows();

        // Average squared Frobenius distance of each outer product from the sample matrix
        let mut pi = 0.0;
        for t in 0..observations {
            for i in 0..n {
                for j in 0..n {
                    let diff = deviations[i][t] * deviations[j][t] - sample_rows[i][j];
                    pi += diff * diff;
                }
            }
        }
        pi /= observations as f64;

        // Squared Frobenius distance from the target
        let mut rho = 0.0;
        for i in 0..n {
            for j in 0..n {
                let target = if i == j { target_variance } else { 0.0 };
                let diff = sample_rows[i][j] - target;
                rho += diff * diff;
            }
        }

        let intensity = if rho > 0.0 {
            (pi / observations as f64 / rho).clamp(0.0, 1.0)
        } else {
            // Sample already equals the target
            0.0
        };

        let matrix = CovarianceMatrix::from_symmetric_fn(n, |i, j| {
            if i == j {
                (intensity * target_variance + (1.0 - intensity) * sample_rows[i][i])
                    .max(self.config.variance_floor)
            } else {
                (1.0 - intensity) * sample_rows[i][j]
            }
        });

        debug!(
            assets = n,
            observations,
            intensity,
            target_variance,
            "Ledoit-Wolf shrinkage"
        );

        Ok(ShrinkageEstimate {
            matrix,
            intensity,
            target_variance,
        })
    }

    /// Weighted covariance using the configured half-life and regime bandwidth
    pub fn regime_weighted(
        &self,
        returns: &[Vec<f64>],
        observation_regimes: &[f64],
        current_regime: f64,
    ) -> Result<WeightedCovariance> {
        self.regime_weighted_covariance(
            returns,
            observation_regimes,
            current_regime,
            self.config.default_half_life_days,
            self.config.regime_bandwidth,
        )
    }

    /// Covariance with per-observation weights
    ///
    /// `w_t ∝ 0.5^(age_t / half_life) * exp(-0.5 * ((regime_t - current) / bandwidth)^2)`
    /// where age 0 is the newest observation. An infinite half-life or
    /// bandwidth removes that factor. Weights are normalized to sum to 1 and
    /// the result uses the reliability-weighted unbiased estimator
    /// `sum w d d' / (1 - sum w^2)`, which equals the sample covariance under
    /// uniform weights.
    pub fn regime_weighted_covariance(
        &self,
        returns: &[Vec<f64>],
        observation_regimes: &[f64],
        current_regime: f64,
        half_life: f64,
        bandwidth: f64,
    ) -> Result<WeightedCovariance> {
        let observations = validate_returns(returns)?;
        if !returns.is_empty() && observation_regimes.len() != observations {
            return Err(RiskModelError::DimensionMismatch {
                expected: observations,
                actual: observation_regimes.len(),
            });
        }
        if half_life.is_nan() || half_life <= 0.0 {
            return Err(invalid("half_life", "must be positive or infinite"));
        }
        if bandwidth.is_nan() || bandwidth <= 0.0 {
            return Err(invalid("bandwidth", "must be positive or infinite"));
        }
        if !current_regime.is_finite() || observation_regimes.iter().any(|r| !r.is_finite()) {
            return Err(invalid("regime", "regime scores must be finite"));
        }

        let weights = observation_weights(observation_regimes, current_regime, half_life, bandwidth)?;
        let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
        let effective_sample_size = 1.0 / sum_sq;
        let denominator = 1.0 - sum_sq;
        if denominator <= f64::EPSILON {
            return Err(RiskModelError::DegenerateWeights(format!(
                "effective sample size {:.3} is too small",
                effective_sample_size
            )));
        }

        let deviations = demean(returns, &weights);
        let matrix = weighted_cross_products(&deviations, Some(&weights), 1.0 / denominator);

        let over_conditioned = effective_sample_size < self.config.min_effective_samples;
        if over_conditioned {
            warn!(
                effective_sample_size,
                minimum = self.config.min_effective_samples,
                current_regime,
                "Regime-weighted covariance is over-conditioned"
            );
        }

        Ok(WeightedCovariance {
            matrix,
            weights,
            effective_sample_size,
            over_conditioned,
        })
    }

    /// Pairs whose absolute correlation exceeds `threshold`, strongest first
    ///
    /// Assets with zero variance have no defined correlation and are skipped.
    pub fn correlations(
        &self,
        matrix: &CovarianceMatrix,
        ids: &[String],
        threshold: f64,
    ) -> Result<Vec<CorrelationPair>> {
        if ids.len() != matrix.dim() {
            return Err(RiskModelError::DimensionMismatch {
                expected: matrix.dim(),
                actual: ids.len(),
            });
        }

        let corr = self.correlation_matrix(matrix);
        let mut pairs = Vec::new();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let Some(rho) = corr[i][j] else { continue };
                if rho.abs() > threshold {
                    pairs.push(CorrelationPair {
                        first: ids[i].clone(),
                        second: ids[j].clone(),
                        correlation: rho,
                    });
                }
            }
        }

        pairs.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));
        Ok(pairs)
    }

    /// Correlations above the configured threshold
    pub fn correlated_pairs(
        &self,
        matrix: &CovarianceMatrix,
        ids: &[String],
    ) -> Result<Vec<CorrelationPair>> {
        self.correlations(matrix, ids, self.config.correlation_threshold)
    }

    /// Full correlation matrix; entries involving a zero-variance asset are None
    pub fn correlation_matrix(&self, matrix: &CovarianceMatrix) -> Vec<Vec<Option<f64>>> {
        let n = matrix.dim();
        let rows = matrix.rows();
        let mut corr = vec![vec![None; n]; n];

        for i in 0..n {
            for j in i..n {
                let denom = (rows[i][i] * rows[j][j]).sqrt();
                if denom > 0.0 && denom.is_finite() {
                    let rho = if i == j {
                        1.0
                    } else {
                        (rows[i][j] / denom).clamp(-1.0, 1.0)
                    };
                    corr[i][j] = Some(rho);
                    corr[j][i] = Some(rho);
                }
            }
        }

        corr
    }
}

fn invalid(name: &str, message: &str) -> RiskModelError {
    RiskModelError::InvalidParameter {
        name: name.to_string(),
        message: message.to_string(),
    }
}

/// Check equal lengths, finiteness and at least two observations; returns the length
fn validate_returns(returns: &[Vec<f64>]) -> Result<usize> {
    let Some(first) = returns.first() else {
        return Ok(0);
    };
    let observations = first.len();

    if let Some(series) = returns.iter().find(|s| s.len() != observations) {
        return Err(RiskModelError::DimensionMismatch {
            expected: observations,
            actual: series.len(),
        });
    }
    if observations < 2 {
        return Err(RiskModelError::InsufficientData {
            required: 2,
            actual: observations,
        });
    }
    if returns.iter().flatten().any(|r| !r.is_finite()) {
        return Err(invalid("returns", "contains NaN or infinite values"));
    }

    Ok(observations)
}

/// Normalized decay times regime-kernel weights, oldest first
fn observation_weights(
    regimes: &[f64],
    current: f64,
    half_life: f64,
    bandwidth: f64,
) -> Result<Vec<f64>> {
    let last = regimes.len().saturating_sub(1);
    let raw: Vec<f64> = regimes
        .iter()
        .enumerate()
        .map(|(t, regime)| {
            let age = (last - t) as f64;
            let decay = if half_life.is_infinite() {
                1.0
            } else {
                0.5_f64.powf(age / half_life)
            };
            let kernel = if bandwidth.is_infinite() {
                1.0
            } else {
                let z = (regime - current) / bandwidth;
                (-0.5 * z * z).exp()
            };
            decay * kernel
        })
        .collect();

    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(RiskModelError::DegenerateWeights(format!(
            "weights sum to {}",
            total
        )));
    }

    Ok(raw.into_iter().map(|w| w / total).collect())
}

/// Subtract the weighted mean of each series
fn demean(returns: &[Vec<f64>], weights: &[f64]) -> Vec<Vec<f64>> {
    returns
        .iter()
        .map(|series| {
            let mean: f64 = series.iter().zip(weights).map(|(r, w)| r * w).sum();
            series.iter().map(|r| r - mean).collect()
        })
        .collect()
}

/// `scale * sum_t w_t d_i,t d_j,t`; unweighted when `weights` is None
fn weighted_cross_products(
    deviations: &[Vec<f64>],
    weights: Option<&[f64]>,
    scale: f64,
) -> CovarianceMatrix {
    CovarianceMatrix::from_symmetric_fn(deviations.len(), |i, j| {
        let sum: f64 = match weights {
            Some(w) => deviations[i]
                .iter()
                .zip(&deviations[j])
                .zip(w)
                .map(|((a, b), w)| w * a * b)
                .sum(),
            None => deviations[i]
                .iter()
                .zip(&deviations[j])
                .map(|(a, b)| a * b)
                .sum(),
        };
        sum * scale
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn returns() -> Vec<Vec<f64>> {
        vec![
            vec![0.010, -0.020, 0.015, 0.003, -0.007, 0.012, -0.004, 0.009],
            vec![0.008, -0.018, 0.011, 0.001, -0.009, 0.010, -0.001, 0.007],
            vec![-0.004, 0.006, -0.002, 0.010, 0.001, -0.008, 0.005, -0.003],
        ]
    }

    fn assert_valid(matrix: &CovarianceMatrix) {
        assert!(matrix.is_symmetric(1e-15));
        for i in 0..matrix.dim() {
            assert!(matrix.variance(i).unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_sample_covariance_known_values() {
        let builder = RiskModelBuilder::default();
        let cov = builder
            .sample_covariance(&[vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0]])
            .unwrap();

        assert!((cov.get(0, 0).unwrap() - 1.0).abs() < 1e-12);
        assert!((cov.get(1, 1).unwrap() - 4.0).abs() < 1e-12);
        assert!((cov.get(0, 1).unwrap() - 2.0).abs() < 1e-12);
        assert_valid(&cov);
    }

    #[test]
    fn test_sample_covariance_rejects_bad_input() {
        let builder = RiskModelBuilder::default();

        assert!(matches!(
            builder.sample_covariance(&[vec![0.1]]),
            Err(RiskModelError::InsufficientData { required: 2, actual: 1 })
        ));
        assert!(matches!(
            builder.sample_covariance(&[vec![0.1, 0.2], vec![0.1]]),
            Err(RiskModelError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            builder.sample_covariance(&[vec![0.1, f64::NAN]]),
            Err(RiskModelError::InvalidParameter { .. })
        ));
        assert!(builder.sample_covariance(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_ledoit_wolf_shrinks_off_diagonal() {
        let builder = RiskModelBuilder::default();
        let sample = builder.sample_covariance(&returns()).unwrap();
        let shrunk = builder.ledoit_wolf(&returns()).unwrap();

        assert!((0.0..=1.0).contains(&shrunk.intensity));
        assert_valid(&shrunk.matrix);
        for i in 0..3 {
            assert!(shrunk.matrix.variance(i).unwrap() > 0.0);
            for j in 0..3 {
                if i != j {
                    assert!(shrunk.matrix.get(i, j).unwrap().abs() <= sample.get(i, j).unwrap().abs() + 1e-18);
                }
            }
        }
    }

    #[test]
    fn test_ledoit_wolf_floors_zero_variance() {
        let builder = RiskModelBuilder::default();
        let shrunk = builder
            .ledoit_wolf(&[vec![0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]])
            .unwrap();

        assert_eq!(shrunk.intensity, 0.0);
        assert_eq!(shrunk.matrix.variance(0), Some(builder.config().variance_floor));
    }

    #[test]
    fn test_uniform_weights_match_sample() {
        let builder = RiskModelBuilder::default();
        let regimes = vec![0.2, -0.4, 0.9, 0.0, 0.1, -0.8, 0.5, 0.3];

        let weighted = builder
            .regime_weighted_covariance(&returns(), &regimes, 0.0, f64::INFINITY, f64::INFINITY)
            .unwrap();
        let sample = builder.sample_covariance(&returns()).unwrap();

        assert!((weighted.effective_sample_size - 8.0).abs() < 1e-9);
        assert!(weighted.weights.iter().all(|w| (w - 0.125).abs() < 1e-12));
        for i in 0..3 {
            for j in 0..3 {
                assert!((weighted.matrix.get(i, j).unwrap() - sample.get(i, j).unwrap()).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_weights_favor_recent_and_similar_regimes() {
        let builder = RiskModelBuilder::default();
        let regimes = vec![0.5; 8];

        let decayed = builder
            .regime_weighted_covariance(&returns(), &regimes, 0.5, 2.0, f64::INFINITY)
            .unwrap();
        assert!(decayed.weights.windows(2).all(|w| w[0] < w[1]));
        assert!((decayed.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let mut mixed = vec![-0.8; 8];
        mixed[2] = 0.5;
        mixed[5] = 0.5;
        let conditioned = builder
            .regime_weighted_covariance(&returns(), &mixed, 0.5, f64::INFINITY, 0.3)
            .unwrap();
        assert!(conditioned.weights[2] > conditioned.weights[0]);
        assert!(conditioned.effective_sample_size < 8.0);
        assert!(conditioned.over_conditioned);
        assert_valid(&conditioned.matrix);
    }

    #[test]
    fn test_weighted_covariance_rejects_bad_parameters() {
        let builder = RiskModelBuilder::default();
        let regimes = vec![0.0; 8];

        assert!(matches!(
            builder.regime_weighted_covariance(&returns(), &regimes[..4], 0.0, 10.0, 0.3),
            Err(RiskModelError::DimensionMismatch { expected: 8, actual: 4 })
        ));
        assert!(matches!(
            builder.regime_weighted_covariance(&returns(), &regimes, 0.0, 0.0, 0.3),
            Err(RiskModelError::InvalidParameter { .. })
        ));
        assert!(matches!(
            builder.regime_weighted_covariance(&returns(), &regimes, 0.0, 10.0, -1.0),
            Err(RiskModelError::InvalidParameter { .. })
        ));
        // Kernel underflows to zero for every observation
        assert!(matches!(
            builder.regime_weighted_covariance(&returns(), &regimes, 1.0, 10.0, 1e-6),
            Err(RiskModelError::DegenerateWeights(_))
        ));
    }

    #[test]
    fn test_correlations_above_threshold() {
        let builder = RiskModelBuilder::default();
        let cov = builder.sample_covariance(&returns()).unwrap();
        let ids: Vec<String> = ["AAA", "BBB", "CCC"].iter().map(|s| s.to_string()).collect();

        let pairs = builder.correlations(&cov, &ids, 0.7).unwrap();
        assert!(pairs.iter().any(|p| p.first == "AAA" && p.second == "BBB" && p.correlation > 0.9));
        assert!(pairs.iter().all(|p| p.correlation.abs() > 0.7));

        let all = builder.correlations(&cov, &ids, 0.0).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].correlation.abs() >= w[1].correlation.abs()));
    }

    #[test]
    fn test_correlations_dimension_mismatch() {
        let builder = RiskModelBuilder::default();
        let cov = CovarianceMatrix::zeros(2);
        assert!(matches!(
            builder.correlations(&cov, &["A".to_string()], 0.5),
            Err(RiskModelError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_correlation_matrix_skips_zero_variance() {
        let builder = RiskModelBuilder::default();
        let cov = builder
            .sample_covariance(&[vec![0.01, 0.02, 0.03], vec![0.0, 0.0, 0.0]])
            .unwrap();

        let corr = builder.correlation_matrix(&cov);
        assert_eq!(corr[0][0], Some(1.0));
        assert_eq!(corr[0][1], None);
        assert_eq!(corr[1][1], None);
    }

    #[test]
    fn test_align_return_series_keeps_most_recent() {
        let aligned = RiskModelBuilder::align_return_series(&[
            vec![1.0, 2.0, 3.0, 4.0],
            vec![30.0, 40.0],
        ]);
        assert_eq!(aligned, vec![vec![3.0, 4.0], vec![30.0, 40.0]]);
    }
}
