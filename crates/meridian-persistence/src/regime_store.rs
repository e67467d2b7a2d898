//! Regime score persistence with per-region exponential smoothing
//!
//! Each region keeps its own EMA chain: the first entry for a region is stored
//! unsmoothed, every later entry is `alpha * raw + (1 - alpha) * previous`.
//! The read-previous-then-append step runs under a per-region async lock and
//! inside one `BEGIN IMMEDIATE` transaction, so concurrent writers to one
//! region cannot lose updates and a row is committed whole or not at all.
//! Writers to different regions never share a lock; on a file database their
//! transactions queue on SQLite's write lock through the busy timeout. Each
//! write runs on its own task, so a caller that gives up early never leaves a
//! pooled connection inside an open transaction.

use crate::{
    error::{PersistenceError, Result},
    repositories::RegimeHistoryRepository,
    Database,
};
use async_trait::async_trait;
use chrono::Utc;
use meridian_core::{
    DiscreteRegime, RegimeConfig, RegimeHistoryEntry, ScoreStore, StoreError, NEUTRAL_SCORE,
};
use parking_lot::Mutex;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Append-only regime history store with EMA smoothing
pub struct RegimePersistence {
    db: Database,
    config: RegimeConfig,
    /// Rows kept per region after each write; None keeps everything
    retention: Option<i64>,
    region_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RegimePersistence {
    pub fn new(db: Database, config: RegimeConfig) -> Self {
        Self {
            db,
            config,
            retention: None,
            region_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Prune each region to its most recent `keep` rows after writes
    pub fn with_retention(mut self, keep: i64) -> Self {
        self.retention = (keep > 0).then_some(keep);
        self
    }

    /// Smoothing weight of the newest raw score
    pub fn alpha(&self) -> f64 {
        self.config.smoothing_alpha
    }

    /// EMA step; the first value for a region passes through unchanged
    pub fn smooth(&self, previous: Option<f64>, raw: f64) -> f64 {
        ema(self.config.smoothing_alpha, previous, raw)
    }

    fn region_lock(&self, region: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.region_locks.lock();
        Arc::clone(locks.entry(region.to_string()).or_default())
    }

    /// Smooth and append a raw score for a region
    pub async fn record_regime_score_for_region(
        &self,
        region: &str,
        raw: f64,
    ) -> Result<RegimeHistoryEntry> {
        if !raw.is_finite() {
            return Err(PersistenceError::InvalidValue {
                column: "raw_score".to_string(),
                value: raw.to_string(),
            });
        }

        let lock = self.region_lock(region);
        let db = self.db.clone();
        let config = self.config.clone();
        let owned_region = region.to_string();

        let (entry, first_entry) = tokio::spawn(async move {
            let _guard = lock.lock().await;
            append_smoothed(&db, &config, &owned_region, raw).await
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))??;

        if let Some(keep) = self.retention {
            let pruned = RegimeHistoryRepository::new(&self.db).prune(region, keep).await?;
            if pruned > 0 {
                debug!(region = %region, pruned, "Pruned regime history");
            }
        }

        info!(
            region = %region,
            raw_score = raw,
            smoothed_score = entry.smoothed_score,
            regime = %entry.discrete_regime,
            first_entry,
            "Recorded regime score"
        );

        Ok(entry)
    }

    /// Latest smoothed score, neutral when the region has no history
    pub async fn get_current_regime_score_for_region(&self, region: &str) -> Result<f64> {
        let latest = RegimeHistoryRepository::new(&self.db).latest(region).await?;
        Ok(latest.map(|e| e.smoothed_score).unwrap_or(NEUTRAL_SCORE))
    }

    /// Latest smoothed score of every region with history
    pub async fn get_all_current_scores(&self) -> Result<HashMap<String, f64>> {
        let latest = RegimeHistoryRepository::new(&self.db).latest_per_region().await?;
        Ok(latest
            .into_iter()
            .map(|e| (e.region, e.smoothed_score))
            .collect())
    }

    /// Most recent entries first, at most `limit`
    pub async fn get_regime_history_for_region(
        &self,
        region: &str,
        limit: usize,
    ) -> Result<Vec<RegimeHistoryEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        RegimeHistoryRepository::new(&self.db).history(region, limit).await
    }
}

fn ema(alpha: f64, previous: Option<f64>, raw: f64) -> f64 {
    match previous {
        Some(prev) => alpha * raw + (1.0 - alpha) * prev,
        None => raw,
    }
}

/// Smooth against the region's latest row and append, as one write transaction
///
/// Returns the stored entry and whether it is the region's first.
async fn append_smoothed(
    db: &Database,
    config: &RegimeConfig,
    region: &str,
    raw: f64,
) -> Result<(RegimeHistoryEntry, bool)> {
    let mut conn = db.pool().acquire().await?;

    // Take the write lock up front; a deferred transaction that reads first
    // fails with SQLITE_BUSY instead of waiting when another writer is active
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let outcome = match write_smoothed(&mut conn, config, region, raw).await {
        Ok(written) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| written)
            .map_err(PersistenceError::from),
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!(region = %region, error = %e, "Rollback of regime write failed");
        }
    }

    outcome
}

async fn write_smoothed(
    conn: &mut SqliteConnection,
    config: &RegimeConfig,
    region: &str,
    raw: f64,
) -> Result<(RegimeHistoryEntry, bool)> {
    let previous = RegimeHistoryRepository::latest_with(&mut *conn, region).await?;
    let smoothed = ema(
        config.smoothing_alpha,
        previous.as_ref().map(|e| e.smoothed_score),
        raw,
    );

    let mut entry = RegimeHistoryEntry {
        id: None,
        recorded_at: Utc::now(),
        region: region.to_string(),
        raw_score: raw,
        smoothed_score: smoothed,
        discrete_regime: DiscreteRegime::from_score(
            smoothed,
            config.bull_threshold,
            config.bear_threshold,
        ),
    };
    entry.id = Some(RegimeHistoryRepository::insert_with(&mut *conn, &entry).await?);

    Ok((entry, previous.is_none()))
}

#[async_trait]
impl ScoreStore for RegimePersistence {
    async fn record_score(
        &self,
        region: &str,
        raw: f64,
    ) -> std::result::Result<RegimeHistoryEntry, StoreError> {
        Ok(self.record_regime_score_for_region(region, raw).await?)
    }

    async fn current_score(&self, region: &str) -> std::result::Result<f64, StoreError> {
        Ok(self.get_current_regime_score_for_region(region).await?)
    }

    async fn all_current_scores(&self) -> std::result::Result<HashMap<String, f64>, StoreError> {
        Ok(self.get_all_current_scores().await?)
    }

    async fn history(
        &self,
        region: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RegimeHistoryEntry>, StoreError> {
        Ok(self.get_regime_history_for_region(region, limit).await?)
    }
}
