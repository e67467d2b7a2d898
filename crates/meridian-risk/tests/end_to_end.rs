//! Regime pipeline against an in-memory SQLite store

use chrono::{Duration, NaiveDate};
use meridian_core::{EngineConfig, Region, RegionCatalog, GLOBAL_AVERAGE_KEY};
use meridian_persistence::{
    Database, IndexPriceRecord, IndexPriceRepository, MarketIndexRepository, RegimePersistence,
    SqlitePriceHistory,
};
use meridian_risk::{
    CacheKeyHasher, HrpLinkageSelector, KellyPositionSizer, LinkageMethod, MarketIndexService,
    MarketRegimeDetector,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DAYS: i64 = 10;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Linear path from `start` to `end` over DAYS closes
fn linear_closes(symbol: &str, start: Decimal, end: Decimal) -> Vec<IndexPriceRecord> {
    let first = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    let step = (end - start) / Decimal::from(DAYS - 1);
    (0..DAYS)
        .map(|i| {
            IndexPriceRecord::new(
                symbol,
                first + Duration::days(i),
                start + step * Decimal::from(i),
            )
        })
        .collect()
}

async fn seeded_db() -> Database {
    init_tracing();
    let db = Database::in_memory().await.unwrap();
    seed(&db).await;
    db
}

async fn seed(db: &Database) {
    let prices = IndexPriceRepository::new(db);
    prices
        .upsert_many(&linear_closes("^GSPC", dec!(100), dec!(110)))
        .await
        .unwrap();
    prices
        .upsert_many(&linear_closes("^STOXX50E", dec!(110), dec!(100)))
        .await
        .unwrap();
    prices
        .upsert_many(&linear_closes("^N225", dec!(100), dec!(100)))
        .await
        .unwrap();
}

fn detector(db: &Database, catalog: RegionCatalog, config: &EngineConfig) -> MarketRegimeDetector {
    let store = Arc::new(RegimePersistence::new(db.clone(), config.regime.clone()));
    let service = MarketIndexService::new(catalog.clone(), Arc::new(SqlitePriceHistory::new(db.clone())));
    MarketRegimeDetector::new(store, catalog, config.regime.clone())
        .with_returns_provider(Arc::new(service))
}

#[tokio::test]
async fn test_regional_scores_follow_price_trends() {
    let db = seeded_db().await;
    let config = EngineConfig::default();
    let detector = detector(&db, RegionCatalog::builtin(), &config);

    let batch = detector.calculate_all_region_scores(DAYS as usize).await;
    assert!(batch.is_complete(), "failures: {:?}", batch.failures);

    let us = batch.scores.get(Region::Us).unwrap();
    let eu = batch.scores.get(Region::Eu).unwrap();
    let asia = batch.scores.get(Region::Asia).unwrap();

    assert!(us > 0.0);
    assert!(eu < 0.0);
    assert!(asia.abs() < 0.3);
    assert!((batch.scores.global_average - (us + eu + asia) / 3.0).abs() < 1e-12);

    let flat = batch.scores.to_flat_map();
    assert_eq!(flat.len(), 4);
    assert_eq!(flat[GLOBAL_AVERAGE_KEY], batch.scores.global_average);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_batches_on_file_database() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meridian.db");
    let db = Database::new(path.to_str().unwrap()).await.unwrap();
    seed(&db).await;

    let config = EngineConfig::default();
    let detector = detector(&db, RegionCatalog::builtin(), &config);

    for run in 0..20 {
        let batch = detector.calculate_all_region_scores(DAYS as usize).await;
        assert!(batch.is_complete(), "run {}: {:?}", run, batch.failures);
    }

    for region in ["US", "EU", "ASIA"] {
        assert_eq!(detector.get_regime_history(region, 100).await.unwrap().len(), 20);
    }
}

#[tokio::test]
async fn test_repeated_runs_are_smoothed() {
    let db = seeded_db().await;
    let config = EngineConfig::default();
    let detector = detector(&db, RegionCatalog::builtin(), &config);

    let first = detector.calculate_regime_score_for_region(Region::Us, 10).await.unwrap();

    // A sharp reversal only moves the smoothed score a tenth of the way
    IndexPriceRepository::new(&db)
        .upsert_many(&linear_closes("^GSPC", dec!(110), dec!(90)))
        .await
        .unwrap();
    let second = detector.calculate_regime_score_for_region(Region::Us, 10).await.unwrap();

    assert!(second < first);
    assert!(second > 0.0);

    let history = detector.get_regime_history("US", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].smoothed_score, second);
    assert_eq!(history[1].smoothed_score, first);
    assert!(history[0].raw_score < 0.0);
}

#[tokio::test]
async fn test_security_fallback_from_persisted_scores() {
    init_tracing();
    let db = Database::in_memory().await.unwrap();
    let config = EngineConfig::default();
    let store = RegimePersistence::new(db.clone(), config.regime.clone());
    store.record_regime_score_for_region("US", 0.6).await.unwrap();

    let detector = detector(&db, RegionCatalog::builtin(), &config);

    let unknown = detector.get_regime_score_for_security(Region::Unknown).await.unwrap();
    assert!((unknown - 0.6).abs() < 1e-12);

    let current = detector.get_current_regime_scores().await.unwrap();
    assert_eq!(current.get(Region::Eu), Some(0.0));
    assert!((current.global_average - 0.6).abs() < 1e-12);
}

#[tokio::test]
async fn test_disabled_index_leaves_composite() {
    let db = seeded_db().await;
    let registry = MarketIndexRepository::new(&db);
    let builtin = RegionCatalog::builtin();
    registry.sync_catalog(&builtin).await.unwrap();
    registry.set_enabled("^N225", false).await.unwrap();

    let enabled = registry.enabled_symbols().await.unwrap();
    let catalog = builtin.with_enabled_symbols(&enabled);
    let detector = detector(&db, catalog, &EngineConfig::default());

    let batch = detector.calculate_all_region_scores(10).await;

    // ASIA's only seeded index is disabled, so it has no usable data
    assert!(batch.scores.get(Region::Asia).is_none());
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].0, Region::Asia);
    assert_eq!(batch.scores.scores.len(), 2);
}

#[tokio::test]
async fn test_regime_drives_linkage_sizing_and_cache_key() {
    let db = seeded_db().await;
    let config = EngineConfig::from_toml_str(
        r#"
        [kelly.params]
        max_position_size = 0.2

        [hrp]
        bull_threshold = 0.5
        "#,
    )
    .unwrap();
    let detector = detector(&db, RegionCatalog::builtin(), &config);

    let eu = detector.calculate_regime_score_for_region(Region::Eu, 10).await.unwrap();
    assert!(eu < -0.3);

    let linkage = HrpLinkageSelector::new(config.hrp.clone()).select(eu);
    assert_eq!(linkage, LinkageMethod::Complete);

    let sizer = KellyPositionSizer::new(config.kelly.clone()).unwrap();
    let calm = sizer.calculate_optimal_size(0.02, 0.04, 0.5, 0.0).unwrap();
    let bearish = sizer.calculate_optimal_size(0.02, 0.04, 0.5, eu).unwrap();
    assert!(bearish.final_size < calm.final_size);
    assert!(bearish.final_size >= config.kelly.params.min_position_size);

    let assets = vec!["SPY".to_string(), "EZU".to_string()];
    let key = CacheKeyHasher::regime_covariance_key(&assets, 10, eu).unwrap();
    let nearby = CacheKeyHasher::regime_covariance_key(&assets, 10, eu + 0.001).unwrap();
    assert_eq!(key.as_str().len(), 32);
    if CacheKeyHasher::regime_bucket(eu).unwrap() == CacheKeyHasher::regime_bucket(eu + 0.001).unwrap() {
        assert_eq!(key, nearby);
    }
}
