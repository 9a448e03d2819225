//! End-to-end pipeline runs against the offline fallback datasets and a
//! throwaway SQLite store.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reefwatch_pipeline::{
    DerivationMode, Orchestrator, PipelineConfig, SchedulePolicy,
};
use reefwatch_sources::SST_SOURCE_ID;
use reefwatch_storage::{sqlite_url, MetricStore, PayloadCache};
use tempfile::tempdir;

fn offline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        database_url: sqlite_url(&root.join("metrics.db")),
        sqlite_fallback_path: root.join("fallback.db"),
        cache_dir: root.join("cache"),
        sst_url: None,
        ph_url: None,
        reef_wfs_url: None,
        reef_wfs_layer: None,
        reef_wfs_bbox: None,
        max_retries: 2,
        backoff_base: Duration::from_millis(5),
        http_timeout: Duration::from_secs(5),
        user_agent: "reefwatch-test/1.0".to_string(),
        schedule: SchedulePolicy::Interval {
            every: Duration::from_secs(3600),
        },
        derivation: DerivationMode::Full,
    }
}

async fn orchestrator(root: &Path) -> Orchestrator {
    let config = offline_config(root);
    let store = MetricStore::connect(&config.store_config())
        .await
        .expect("connect store");
    store.ensure_schema().await.expect("ensure schema");
    Orchestrator::new(config, store).expect("orchestrator")
}

#[tokio::test]
async fn offline_run_persists_the_synthetic_batch() {
    let dir = tempdir().expect("tempdir");
    let orchestrator = orchestrator(dir.path()).await;

    let summary = orchestrator.run_once().await.expect("run");
    assert_eq!(summary.observations, 3);
    assert_eq!(summary.persisted, 3);

    let cutoff = Utc::now().date_naive() - chrono::Days::new(1);
    let rows = orchestrator
        .store()
        .timeseries_since(cutoff)
        .await
        .expect("timeseries");
    assert_eq!(rows.len(), 3);

    let first = rows
        .iter()
        .find(|r| r.latitude == 6.5 && r.longitude == 92.5)
        .expect("row at 6.5,92.5");
    assert_eq!(first.ph, Some(8.10));
    // Synthetic reef is far away, so the default baseline applies:
    // 80 - (28.2 * 1.5 + 0.5 * 5) = 35.2
    assert!((first.health_score - 35.2).abs() < 1e-9);
}

#[tokio::test]
async fn reruns_are_idempotent() {
    let dir = tempdir().expect("tempdir");
    let orchestrator = orchestrator(dir.path()).await;

    let first = orchestrator.run_once().await.expect("first run");
    let second = orchestrator.run_once().await.expect("second run");
    assert_eq!(first.persisted, second.persisted);

    let cutoff = Utc::now().date_naive() - chrono::Days::new(1);
    let rows = orchestrator
        .store()
        .timeseries_since(cutoff)
        .await
        .expect("timeseries");
    assert_eq!(rows.len(), 3);

    let snapshot = orchestrator.metrics_snapshot();
    assert_eq!(snapshot.runs_total, 2);
    assert_eq!(snapshot.runs_failed_total, 0);
    assert!(snapshot.last_success_unix > 0);
}

#[tokio::test]
async fn updated_source_data_overwrites_the_same_keys() {
    let dir = tempdir().expect("tempdir");
    let orchestrator = orchestrator(dir.path()).await;
    orchestrator.run_once().await.expect("first run");

    // A fresher SST payload for the same grid shows up in the cache;
    // the rerun must overwrite, not duplicate.
    let cache = PayloadCache::new(dir.path().join("cache"));
    cache
        .store(
            SST_SOURCE_ID,
            Utc::now(),
            br#"[
                {"lat": 6.5, "lon": 92.5, "sst": 30.0, "dhw": 0.5},
                {"lat": 6.6, "lon": 92.6, "sst": 30.1, "dhw": 0.6},
                {"lat": 6.7, "lon": 92.7, "sst": 30.2, "dhw": 0.7}
            ]"#,
        )
        .await
        .expect("seed cache");

    let summary = orchestrator.run_once().await.expect("second run");
    assert_eq!(summary.persisted, 3);

    let cutoff = Utc::now().date_naive() - chrono::Days::new(1);
    let rows = orchestrator
        .store()
        .timeseries_since(cutoff)
        .await
        .expect("timeseries");
    assert_eq!(rows.len(), 3);

    let updated = rows
        .iter()
        .find(|r| r.latitude == 6.5 && r.longitude == 92.5)
        .expect("row at 6.5,92.5");
    assert_eq!(updated.sst, 30.0);
    // 80 - (30.0 * 1.5 + 0.5 * 5) = 32.5
    assert!((updated.health_score - 32.5).abs() < 1e-9);
}
