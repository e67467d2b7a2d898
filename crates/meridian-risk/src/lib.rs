//! Meridian Risk
//!
//! Regime detection, covariance estimation, Black-Litterman views, HRP
//! linkage selection, cache-key hashing, and adaptive Kelly sizing.

pub mod cache_key;
pub mod covariance;
pub mod hrp;
pub mod kelly;
pub mod market_index;
pub mod regime_detector;
pub mod views;

pub use cache_key::CacheKeyHasher;
pub use covariance::{CorrelationPair, RiskModelBuilder, ShrinkageEstimate, WeightedCovariance};
pub use hrp::{HrpLinkageSelector, LinkageMethod};
pub use kelly::{BatchSizing, KellyPositionSizer, PortfolioInputs, SizingResult};
pub use market_index::MarketIndexService;
pub use regime_detector::{BatchRegimeScores, MarketRegimeDetector};
pub use views::ViewGenerator;
