//! Engine configuration
//!
//! All sections deserialize from TOML with per-field defaults, so a config
//! file only needs to name the values it overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub regime: RegimeConfig,
    pub risk_model: RiskModelConfig,
    pub kelly: KellyConfig,
    pub views: ViewConfig,
    pub hrp: HrpConfig,
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.regime.validate()?;
        self.risk_model.validate()?;
        self.kelly.validate()?;
        self.views.validate()?;
        self.hrp.validate()?;
        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn require_finite(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, "must be finite"))
    }
}

/// Regime scoring and smoothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// EMA weight of the newest raw score
    pub smoothing_alpha: f64,
    /// Smoothed score at or above which the regime is "bull"
    pub bull_threshold: f64,
    /// Smoothed score at or below which the regime is "bear"
    pub bear_threshold: f64,
    /// Multiplier applied to cumulative return before tanh compression
    pub trend_sensitivity: f64,
    /// Weight of the cumulative-trend component (rest goes to direction consistency)
    pub trend_weight: f64,
    pub default_lookback_days: usize,
    /// Per-region calculation timeout; 0 disables it
    pub region_timeout_secs: u64,
    pub default_history_limit: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.1,
            bull_threshold: 0.3,
            bear_threshold: -0.3,
            trend_sensitivity: 10.0,
            trend_weight: 0.7,
            default_lookback_days: 60,
            region_timeout_secs: 30,
            default_history_limit: 100,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(invalid("regime.smoothing_alpha", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.trend_weight) {
            return Err(invalid("regime.trend_weight", "must be in [0, 1]"));
        }
        require_finite("regime.trend_sensitivity", self.trend_sensitivity)?;
        if self.bear_threshold >= self.bull_threshold {
            return Err(invalid(
                "regime.bear_threshold",
                "must be below regime.bull_threshold",
            ));
        }
        if self.default_lookback_days < 2 {
            return Err(invalid("regime.default_lookback_days", "must be at least 2"));
        }
        Ok(())
    }
}

/// Covariance estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskModelConfig {
    pub default_half_life_days: f64,
    /// Gaussian kernel bandwidth over regime-score distance
    pub regime_bandwidth: f64,
    /// Effective sample size below which a weighted estimate is over-conditioned
    pub min_effective_samples: f64,
    /// Lower bound for shrunk diagonal entries
    pub variance_floor: f64,
    pub correlation_threshold: f64,
}

impl Default for RiskModelConfig {
    fn default() -> Self {
        Self {
            default_half_life_days: 60.0,
            regime_bandwidth: 0.3,
            min_effective_samples: 20.0,
            variance_floor: 1e-10,
            correlation_threshold: 0.7,
        }
    }
}

impl RiskModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_half_life_days.is_nan() || self.default_half_life_days <= 0.0 {
            return Err(invalid("risk_model.default_half_life_days", "must be positive"));
        }
        if self.regime_bandwidth.is_nan() || self.regime_bandwidth <= 0.0 {
            return Err(invalid("risk_model.regime_bandwidth", "must be positive"));
        }
        if !(self.variance_floor > 0.0 && self.variance_floor.is_finite()) {
            return Err(invalid("risk_model.variance_floor", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(invalid("risk_model.correlation_threshold", "must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Kelly sizing parameters, supplied by defaults or a temperament provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyParams {
    /// Multiplier used in fixed mode instead of the adaptive formula
    pub fixed_fractional: f64,
    pub min_position_size: f64,
    pub max_position_size: f64,
    pub base_multiplier: f64,
    /// Multiplier swing from confidence 0.5 to confidence 1.0
    pub confidence_adjustment_range: f64,
    /// Bonus/penalty once the regime crosses a bull/bear threshold
    pub regime_adjustment_range: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub bull_threshold: f64,
    pub bear_threshold: f64,
    /// Largest fractional cut applied at regime -1
    pub bear_max_reduction: f64,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            fixed_fractional: 0.5,
            min_position_size: 0.01,
            max_position_size: 0.15,
            base_multiplier: 0.5,
            confidence_adjustment_range: 0.15,
            regime_adjustment_range: 0.1,
            min_multiplier: 0.25,
            max_multiplier: 0.75,
            bull_threshold: 0.5,
            bear_threshold: -0.5,
            bear_max_reduction: 0.5,
        }
    }
}

impl KellyParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("kelly.params.fixed_fractional", self.fixed_fractional),
            ("kelly.params.min_position_size", self.min_position_size),
            ("kelly.params.max_position_size", self.max_position_size),
            ("kelly.params.base_multiplier", self.base_multiplier),
            ("kelly.params.confidence_adjustment_range", self.confidence_adjustment_range),
            ("kelly.params.regime_adjustment_range", self.regime_adjustment_range),
            ("kelly.params.min_multiplier", self.min_multiplier),
            ("kelly.params.max_multiplier", self.max_multiplier),
            ("kelly.params.bull_threshold", self.bull_threshold),
            ("kelly.params.bear_threshold", self.bear_threshold),
            ("kelly.params.bear_max_reduction", self.bear_max_reduction),
        ];
        for (field, value) in fields {
            require_finite(field, value)?;
        }
        if self.min_position_size < 0.0 || self.min_position_size > self.max_position_size {
            return Err(invalid(
                "kelly.params.min_position_size",
                "must be non-negative and not above max_position_size",
            ));
        }
        if self.min_multiplier > self.max_multiplier {
            return Err(invalid(
                "kelly.params.min_multiplier",
                "must not exceed max_multiplier",
            ));
        }
        if !(0.0..=1.0).contains(&self.bear_max_reduction) {
            return Err(invalid("kelly.params.bear_max_reduction", "must be in [0, 1]"));
        }
        if self.bear_threshold >= self.bull_threshold {
            return Err(invalid(
                "kelly.params.bear_threshold",
                "must be below bull_threshold",
            ));
        }
        Ok(())
    }
}

/// Kelly sizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Use `params.fixed_fractional` instead of the adaptive multiplier
    pub use_fixed_fraction: bool,
    pub risk_free_rate: f64,
    /// Variances at or below this floor produce a zero Kelly fraction
    pub variance_epsilon: f64,
    pub params: KellyParams,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            use_fixed_fraction: false,
            risk_free_rate: 0.0,
            variance_epsilon: 1e-8,
            params: KellyParams::default(),
        }
    }
}

impl KellyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_finite("kelly.risk_free_rate", self.risk_free_rate)?;
        if !(self.variance_epsilon >= 0.0 && self.variance_epsilon.is_finite()) {
            return Err(invalid("kelly.variance_epsilon", "must be non-negative"));
        }
        self.params.validate()
    }
}

/// Black-Litterman view generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Scores strictly above this produce a positive view
    pub positive_threshold: f64,
    /// Scores strictly below this produce a negative view
    pub negative_threshold: f64,
    /// Return tilt per unit of score distance from 0.5
    pub return_scale: f64,
    pub base_uncertainty: f64,
    pub min_uncertainty: f64,
    pub max_uncertainty: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            positive_threshold: 0.8,
            negative_threshold: 0.5,
            return_scale: 0.10,
            base_uncertainty: 0.25,
            min_uncertainty: 0.01,
            max_uncertainty: 0.5,
        }
    }
}

impl ViewConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("views.positive_threshold", self.positive_threshold),
            ("views.negative_threshold", self.negative_threshold),
            ("views.return_scale", self.return_scale),
            ("views.base_uncertainty", self.base_uncertainty),
            ("views.min_uncertainty", self.min_uncertainty),
            ("views.max_uncertainty", self.max_uncertainty),
        ];
        for (field, value) in fields {
            require_finite(field, value)?;
        }
        if self.negative_threshold > self.positive_threshold {
            return Err(invalid(
                "views.negative_threshold",
                "must not exceed positive_threshold",
            ));
        }
        if self.min_uncertainty > self.max_uncertainty {
            return Err(invalid(
                "views.min_uncertainty",
                "must not exceed max_uncertainty",
            ));
        }
        Ok(())
    }
}

/// HRP linkage selection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrpConfig {
    pub bear_threshold: f64,
    pub bull_threshold: f64,
}

impl Default for HrpConfig {
    fn default() -> Self {
        Self {
            bear_threshold: -0.3,
            bull_threshold: 0.3,
        }
    }
}

impl HrpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bear_threshold >= self.bull_threshold {
            return Err(invalid("hrp.bear_threshold", "must be below hrp.bull_threshold"));
        }
        Ok(())
    }
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path to SQLite database file
    pub db_path: String,
    pub enabled: bool,
    /// Regime history rows kept per region by pruning; 0 keeps everything
    pub max_history_per_region: i64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "data/meridian.db".to_string(),
            enabled: true,
            max_history_per_region: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [regime]
            smoothing_alpha = 0.2

            [kelly.params]
            max_position_size = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.regime.smoothing_alpha, 0.2);
        assert_eq!(config.regime.bull_threshold, 0.3);
        assert_eq!(config.kelly.params.max_position_size, 0.2);
        assert_eq!(config.kelly.params.min_position_size, 0.01);
        assert_eq!(config.views.positive_threshold, 0.8);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let err = EngineConfig::from_toml_str("[regime]\nsmoothing_alpha = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "regime.smoothing_alpha"));
    }

    #[test]
    fn test_inverted_position_bounds_rejected() {
        let mut params = KellyParams::default();
        params.min_position_size = 0.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = EngineConfig::from_toml_str("[regime\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load("/nonexistent/meridian.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
