use crate::catalog::Region;
use thiserror::Error;

/// Regime detection errors
#[derive(Error, Debug)]
pub enum RegimeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Region {0} has no dedicated indices")]
    NoIndices(Region),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Score store error: {0}")]
    Store(#[from] StoreError),

    #[error("Timed out after {secs}s computing regime for {region}")]
    Timeout { region: Region, secs: u64 },
}

/// Errors surfaced by score stores and price history providers
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Covariance estimation and view construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskModelError {
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Matrix is not square: {rows} rows, row {row} has {cols} columns")]
    NonSquareMatrix { rows: usize, row: usize, cols: usize },

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Observation weights are degenerate: {0}")]
    DegenerateWeights(String),

    #[error("View set is empty")]
    EmptyViews,

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),
}

/// Position sizing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Index {index} out of bounds for covariance of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Negative variance {variance} for asset {asset}")]
    NegativeVariance { asset: String, variance: f64 },

    #[error("No expected return for asset {0}")]
    MissingExpectedReturn(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
