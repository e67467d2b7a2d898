//! Deterministic cache keys for optimizer and risk-model results
//!
//! Keys are the first 16 bytes of a SHA-256 digest rendered as 32 lowercase
//! hex characters. Before hashing, inputs are canonicalized: asset ids are
//! sorted and every per-asset vector and matrix is permuted to match, so the
//! caller's asset ordering never changes the key.
//!
//! Byte layout fed to the hasher, all integers little-endian:
//!   family tag (NUL-terminated ASCII)
//!   strings   -> u64 byte length, UTF-8 bytes
//!   f64       -> IEEE-754 bits, with -0.0 folded to 0.0
//!   Option    -> 0u8 for None, 1u8 followed by the value
//!   sequences -> u64 element count, elements

use crate::hrp::LinkageMethod;
use meridian_core::{CacheKey, CovarianceMatrix, RiskModelError};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

type Result<T> = std::result::Result<T, RiskModelError>;

const HRP_TAG: &[u8] = b"meridian/hrp/v1\0";
const MEAN_VARIANCE_TAG: &[u8] = b"meridian/mean-variance/v1\0";
const REGIME_COVARIANCE_TAG: &[u8] = b"meridian/regime-covariance/v1\0";

/// Stateless cache key builder
pub struct CacheKeyHasher;

impl CacheKeyHasher {
    /// Key for an HRP allocation over a covariance matrix
    pub fn hrp_key(
        covariance: &CovarianceMatrix,
        asset_ids: &[String],
        linkage: LinkageMethod,
    ) -> Result<CacheKey> {
        let order = canonical_order(asset_ids)?;
        check_dimension(covariance, asset_ids)?;

        let mut buf = KeyBuffer::new(HRP_TAG);
        buf.ids(asset_ids, &order);
        buf.matrix(covariance, &order);
        buf.str(linkage.as_str());
        Ok(buf.finish())
    }

    /// Key for a mean-variance optimization
    pub fn mean_variance_key(
        expected_returns: &[f64],
        covariance: &CovarianceMatrix,
        asset_ids: &[String],
        constraints: &BTreeMap<String, f64>,
        target_return: Option<f64>,
    ) -> Result<CacheKey> {
        let order = canonical_order(asset_ids)?;
        check_dimension(covariance, asset_ids)?;
        if expected_returns.len() != asset_ids.len() {
            return Err(RiskModelError::DimensionMismatch {
                expected: asset_ids.len(),
                actual: expected_returns.len(),
            });
        }

        let mut buf = KeyBuffer::new(MEAN_VARIANCE_TAG);
        buf.ids(asset_ids, &order);
        buf.len(order.len());
        for &i in &order {
            buf.f64(expected_returns[i]);
        }
        buf.matrix(covariance, &order);
        buf.len(constraints.len());
        for (name, value) in constraints {
            buf.str(name);
            buf.f64(*value);
        }
        match target_return {
            Some(target) => {
                buf.u8(1);
                buf.f64(target);
            }
            None => buf.u8(0),
        }
        Ok(buf.finish())
    }

    /// Key for a regime-aware covariance estimate
    ///
    /// The regime score is bucketed to one decimal place first, so nearby
    /// regimes share a key.
    pub fn regime_covariance_key(
        asset_ids: &[String],
        lookback_days: usize,
        regime_score: f64,
    ) -> Result<CacheKey> {
        let order = canonical_order(asset_ids)?;
        let bucket = Self::regime_bucket(regime_score)?;

        let mut buf = KeyBuffer::new(REGIME_COVARIANCE_TAG);
        buf.ids(asset_ids, &order);
        buf.len(lookback_days);
        buf.str(&bucket.to_string());
        Ok(buf.finish())
    }

    /// Round a regime score to the nearest 0.1, halves away from zero
    pub fn regime_bucket(regime_score: f64) -> Result<Decimal> {
        let score = Decimal::from_f64(regime_score).ok_or_else(|| {
            RiskModelError::InvalidParameter {
                name: "regime_score".to_string(),
                message: format!("{} is not representable", regime_score),
            }
        })?;

        Ok(score
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
            .normalize())
    }
}

/// Indices that sort the ids; duplicates make the ordering ambiguous
fn canonical_order(asset_ids: &[String]) -> Result<Vec<usize>> {
    let mut seen = HashSet::with_capacity(asset_ids.len());
    if let Some(dup) = asset_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(RiskModelError::InvalidParameter {
            name: "asset_ids".to_string(),
            message: format!("duplicate asset id {}", dup),
        });
    }

    let mut order: Vec<usize> = (0..asset_ids.len()).collect();
    order.sort_by(|a, b| asset_ids[*a].cmp(&asset_ids[*b]));
    Ok(order)
}

fn check_dimension(covariance: &CovarianceMatrix, asset_ids: &[String]) -> Result<()> {
    if covariance.dim() != asset_ids.len() {
        return Err(RiskModelError::DimensionMismatch {
            expected: asset_ids.len(),
            actual: covariance.dim(),
        });
    }
    Ok(())
}

struct KeyBuffer {
    hasher: Sha256,
}

impl KeyBuffer {
    fn new(tag: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tag);
        Self { hasher }
    }

    fn u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    fn len(&mut self, value: usize) {
        self.hasher.update((value as u64).to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        let value = if value == 0.0 { 0.0 } else { value };
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    fn str(&mut self, value: &str) {
        self.len(value.len());
        self.hasher.update(value.as_bytes());
    }

    fn ids(&mut self, ids: &[String], order: &[usize]) {
        self.len(order.len());
        for &i in order {
            self.str(&ids[i]);
        }
    }

    fn matrix(&mut self, matrix: &CovarianceMatrix, order: &[usize]) {
        let rows = matrix.rows();
        self.len(order.len());
        for &i in order {
            for &j in order {
                self.f64(rows[i][j]);
            }
        }
    }

    fn finish(self) -> CacheKey {
        let digest = self.hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey::from_hex(hex)
    }
}
