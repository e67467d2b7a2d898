//! Shared domain types

use crate::catalog::Region;
use crate::error::RiskModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Key used for the cross-region average in flat score maps
pub const GLOBAL_AVERAGE_KEY: &str = "GLOBAL_AVERAGE";

/// Neutral regime score, returned whenever no history is available
pub const NEUTRAL_SCORE: f64 = 0.0;

/// Discrete market regime derived from a smoothed score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscreteRegime {
    Bull,
    Sideways,
    Bear,
}

impl DiscreteRegime {
    /// Classify a score against bull/bear thresholds
    pub fn from_score(score: f64, bull_threshold: f64, bear_threshold: f64) -> Self {
        if score >= bull_threshold {
            Self::Bull
        } else if score <= bear_threshold {
            Self::Bear
        } else {
            Self::Sideways
        }
    }
}

impl fmt::Display for DiscreteRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bull => write!(f, "bull"),
            Self::Sideways => write!(f, "sideways"),
            Self::Bear => write!(f, "bear"),
        }
    }
}

impl FromStr for DiscreteRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bull" => Ok(Self::Bull),
            "sideways" => Ok(Self::Sideways),
            "bear" => Ok(Self::Bear),
            _ => Err(format!("Invalid discrete regime: {}", s)),
        }
    }
}

/// One append-only regime history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeHistoryEntry {
    pub id: Option<i64>,
    pub recorded_at: DateTime<Utc>,
    /// Region key; legacy rows may carry "GLOBAL"
    pub region: String,
    pub raw_score: f64,
    pub smoothed_score: f64,
    pub discrete_regime: DiscreteRegime,
}

/// Regime scores per indexed region plus the cross-region average
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionScores {
    pub scores: BTreeMap<Region, f64>,
    pub global_average: f64,
}

impl RegionScores {
    /// Build from per-region scores; the global average covers indexed regions only
    pub fn from_scores(scores: BTreeMap<Region, f64>) -> Self {
        let global_average = global_average(&scores);
        Self {
            scores,
            global_average,
        }
    }

    pub fn get(&self, region: Region) -> Option<f64> {
        self.scores.get(&region).copied()
    }

    /// Flat map keyed by region name, with the average under `GLOBAL_AVERAGE`
    pub fn to_flat_map(&self) -> HashMap<String, f64> {
        let mut map: HashMap<String, f64> = self
            .scores
            .iter()
            .map(|(region, score)| (region.as_str().to_string(), *score))
            .collect();
        map.insert(GLOBAL_AVERAGE_KEY.to_string(), self.global_average);
        map
    }
}

/// Mean of the indexed-region scores present in the map; neutral when none
pub fn global_average(scores: &BTreeMap<Region, f64>) -> f64 {
    let indexed: Vec<f64> = scores
        .iter()
        .filter(|(region, _)| region.has_indices())
        .map(|(_, score)| *score)
        .collect();

    if indexed.is_empty() {
        return NEUTRAL_SCORE;
    }

    indexed.iter().sum::<f64>() / indexed.len() as f64
}

/// Square covariance matrix stored row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    rows: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
    /// Create from rows, validating that the matrix is square
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, RiskModelError> {
        let n = rows.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(RiskModelError::NonSquareMatrix {
                    rows: n,
                    row: i,
                    cols: row.len(),
                });
            }
        }
        Ok(Self { rows })
    }

    /// Zero matrix of dimension n
    pub fn zeros(n: usize) -> Self {
        Self {
            rows: vec![vec![0.0; n]; n],
        }
    }

    /// Symmetric matrix of dimension n; `f` is called once per cell on or above the diagonal
    pub fn from_symmetric_fn(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut rows = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let value = f(i, j);
                rows[i][j] = value;
                rows[j][i] = value;
            }
        }
        Self { rows }
    }

    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.rows.get(i).and_then(|row| row.get(j)).copied()
    }

    /// Variance on the diagonal at position i
    pub fn variance(&self, i: usize) -> Option<f64> {
        self.get(i, i)
    }


    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.dim();
        (0..n).all(|i| (i + 1..n).all(|j| (self.rows[i][j] - self.rows[j][i]).abs() <= tolerance))
    }
}

/// Black-Litterman investor view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    /// Asset is expected to return `expected_return`
    Absolute {
        asset: String,
        expected_return: f64,
        confidence: f64,
    },
    /// First asset is expected to outperform the second
    Relative {
        long_asset: String,
        short_asset: String,
        confidence: f64,
    },
}

impl View {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Absolute { confidence, .. } | Self::Relative { confidence, .. } => *confidence,
        }
    }

    /// Assets referenced by the view
    pub fn assets(&self) -> Vec<&str> {
        match self {
            Self::Absolute { asset, .. } => vec![asset.as_str()],
            Self::Relative {
                long_asset,
                short_asset,
                ..
            } => vec![long_asset.as_str(), short_asset.as_str()],
        }
    }
}

/// Opaque 128-bit cache digest rendered as 32 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a hex digest
    pub fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
