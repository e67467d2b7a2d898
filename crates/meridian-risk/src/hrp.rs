//! Regime-dependent linkage selection for HRP clustering

use meridian_core::HrpConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Hierarchical clustering linkage rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageMethod {
    /// Nearest-neighbour distance
    Single,
    /// Farthest-neighbour distance
    Complete,
    /// Mean pairwise distance
    Average,
}

impl LinkageMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Complete => "complete",
            Self::Average => "average",
        }
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkageMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "complete" => Ok(Self::Complete),
            "average" => Ok(Self::Average),
            other => Err(format!("unknown linkage method: {}", other)),
        }
    }
}

/// Picks a linkage method from the current regime score
///
/// Bearish markets use complete linkage, bullish markets average linkage, and
/// everything in between single linkage.
#[derive(Debug, Clone, Default)]
pub struct HrpLinkageSelector {
    config: HrpConfig,
}

impl HrpLinkageSelector {
    pub fn new(config: HrpConfig) -> Self {
        Self { config }
    }

    pub fn select(&self, regime_score: f64) -> LinkageMethod {
        let method = if regime_score <= self.config.bear_threshold {
            LinkageMethod::Complete
        } else if regime_score >= self.config.bull_threshold {
            LinkageMethod::Average
        } else {
            LinkageMethod::Single
        };

        debug!(regime_score, linkage = %method, "Selected HRP linkage");
        method
    }
}
