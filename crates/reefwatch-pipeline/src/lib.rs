//! Pipeline stages and orchestration: clean, merge, derive, persist, and
//! the scheduling loop that drives one run per tick.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use reefwatch_core::{
    MergedRecord, Observation, ObservationDraft, OceanMetric, PhDraft, PhReading, ReefGeometry,
    ReefGeometryDraft, DEFAULT_REEF_BASELINE,
};
use reefwatch_sources::{
    BoundingBox, DataOrigin, PhSource, PhSourceConfig, ReefSource, ReefSourceConfig, SstSource,
    SstSourceConfig, BBOX_PADDING_DEG,
};
use reefwatch_storage::{
    BackoffPolicy, FetchMetrics, HttpClientConfig, HttpFetcher, MetricStore, PayloadCache,
    SourceFetchSnapshot, StoreConfig, StoreError,
};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "reefwatch-pipeline";

/// Stressor weights in the health score.
pub const HEALTH_SST_WEIGHT: f64 = 1.5;
pub const HEALTH_DHW_WEIGHT: f64 = 5.0;

/// Minimum non-null pH history before a forecast is attempted.
pub const MIN_FORECAST_POINTS: usize = 30;

/// An observation with no enclosing reef may still match the nearest
/// geometry within this radius.
pub const NEAREST_MATCH_RADIUS_DEG: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationMode {
    Full,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulePolicy {
    Daily { hour: u8, minute: u8 },
    Interval { every: Duration },
}

pub fn parse_derivation(value: Option<&str>) -> DerivationMode {
    match value {
        Some(v) if v.eq_ignore_ascii_case("light") => DerivationMode::Light,
        _ => DerivationMode::Full,
    }
}

pub fn parse_schedule(
    mode: Option<&str>,
    hour: Option<u8>,
    minute: Option<u8>,
    interval_secs: Option<u64>,
) -> SchedulePolicy {
    match mode {
        Some(m) if m.eq_ignore_ascii_case("interval") => SchedulePolicy::Interval {
            every: Duration::from_secs(interval_secs.unwrap_or(3600)),
        },
        _ => SchedulePolicy::Daily {
            hour: hour.unwrap_or(6).min(23),
            minute: minute.unwrap_or(0).min(59),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub sqlite_fallback_path: PathBuf,
    pub cache_dir: PathBuf,
    pub sst_url: Option<String>,
    pub ph_url: Option<String>,
    pub reef_wfs_url: Option<String>,
    pub reef_wfs_layer: Option<String>,
    pub reef_wfs_bbox: Option<BoundingBox>,
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub schedule: SchedulePolicy,
    pub derivation: DerivationMode,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let sqlite_fallback_path = env("REEFWATCH_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./reefwatch.db"));
        let database_url = env("DATABASE_URL")
            .unwrap_or_else(|| reefwatch_storage::sqlite_url(&sqlite_fallback_path));

        Self {
            database_url,
            sqlite_fallback_path,
            cache_dir: env("REEFWATCH_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./cache")),
            sst_url: env("NOAA_SST_URL"),
            ph_url: env("NOAA_PH_URL"),
            reef_wfs_url: env("REEF_WFS_URL"),
            reef_wfs_layer: env("REEF_WFS_LAYER"),
            reef_wfs_bbox: env("REEF_WFS_BBOX").and_then(|v| BoundingBox::parse(&v)),
            max_retries: env("REEFWATCH_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            backoff_base: Duration::from_secs(
                env("REEFWATCH_BACKOFF_BASE_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            ),
            http_timeout: Duration::from_secs(
                env("REEFWATCH_HTTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            user_agent: env("REEFWATCH_USER_AGENT").unwrap_or_else(|| "reefwatch/1.0".to_string()),
            schedule: parse_schedule(
                env("REEFWATCH_SCHEDULE").as_deref(),
                env("REEFWATCH_SCHEDULE_HOUR").and_then(|v| v.parse().ok()),
                env("REEFWATCH_SCHEDULE_MINUTE").and_then(|v| v.parse().ok()),
                env("REEFWATCH_INTERVAL_SECS").and_then(|v| v.parse().ok()),
            ),
            derivation: parse_derivation(env("REEFWATCH_DERIVATION").as_deref()),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url.clone(),
            sqlite_fallback_path: self.sqlite_fallback_path.clone(),
        }
    }

    fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                base_delay: self.backoff_base,
                ..BackoffPolicy::default()
            },
        }
    }
}

/// Drops drafts missing a required field, clips physical ranges, and
/// stamps the run date. Missing DHW is a default, not an error.
pub fn clean_observations(drafts: &[ObservationDraft], date: NaiveDate) -> Vec<Observation> {
    drafts
        .iter()
        .filter_map(|d| {
            Some(Observation {
                latitude: d.lat?,
                longitude: d.lon?,
                date,
                sst: d.sst?.max(0.0),
                dhw: d.dhw.unwrap_or(0.0).max(0.0),
            })
        })
        .collect()
}

pub fn clean_ph(drafts: &[PhDraft], date: NaiveDate) -> Vec<PhReading> {
    drafts
        .iter()
        .filter_map(|d| {
            Some(PhReading {
                latitude: d.lat?,
                longitude: d.lon?,
                date,
                ph: d.ph?,
            })
        })
        .collect()
}

pub fn clean_reefs(drafts: Vec<ReefGeometryDraft>) -> Vec<ReefGeometry> {
    drafts
        .into_iter()
        .filter_map(|d| {
            Some(ReefGeometry {
                geometry: d.geometry?,
                reef_type: d.reef_type?,
                reef_health_baseline: d
                    .reef_health_baseline
                    .unwrap_or(DEFAULT_REEF_BASELINE)
                    .clamp(0.0, 100.0),
            })
        })
        .collect()
}

/// Left join on exact (latitude, longitude, date). Unmatched observations
/// keep a null pH; unmatched readings are dropped.
pub fn integrate_ph(observations: Vec<Observation>, readings: &[PhReading]) -> Vec<MergedRecord> {
    let mut by_key = std::collections::HashMap::new();
    for reading in readings {
        by_key
            .entry((
                reading.date,
                reading.latitude.to_bits(),
                reading.longitude.to_bits(),
            ))
            .or_insert(reading.ph);
    }

    observations
        .into_iter()
        .map(|obs| MergedRecord {
            ph: by_key
                .get(&(obs.date, obs.latitude.to_bits(), obs.longitude.to_bits()))
                .copied(),
            latitude: obs.latitude,
            longitude: obs.longitude,
            date: obs.date,
            sst: obs.sst,
            dhw: obs.dhw,
            reef_type: None,
            reef_health_baseline: DEFAULT_REEF_BASELINE,
        })
        .collect()
}

/// Attaches the enclosing reef, or the nearest one within
/// [`NEAREST_MATCH_RADIUS_DEG`]. With no geometry available the batch
/// passes through unchanged; that is a degradation, not a failure.
pub fn spatial_merge(
    mut records: Vec<MergedRecord>,
    reefs: Option<&[ReefGeometry]>,
) -> Vec<MergedRecord> {
    let Some(reefs) = reefs.filter(|r| !r.is_empty()) else {
        warn!("reef geometry unavailable, passing observations through unmerged");
        return records;
    };

    for record in &mut records {
        if let Some(reef) = match_reef(reefs, record.longitude, record.latitude) {
            record.reef_type = Some(reef.reef_type.clone());
            record.reef_health_baseline = reef.reef_health_baseline;
        }
    }
    records
}

fn match_reef<'a>(reefs: &'a [ReefGeometry], lon: f64, lat: f64) -> Option<&'a ReefGeometry> {
    if let Some(enclosing) = reefs.iter().find(|r| r.geometry.contains(lon, lat)) {
        return Some(enclosing);
    }
    reefs
        .iter()
        .map(|r| (r, r.geometry.distance_deg(lon, lat)))
        .filter(|(_, distance)| *distance <= NEAREST_MATCH_RADIUS_DEG)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(reef, _)| reef)
}

pub fn health_score(baseline: f64, sst: f64, dhw: f64) -> f64 {
    (baseline - (sst * HEALTH_SST_WEIGHT + dhw * HEALTH_DHW_WEIGHT)).max(0.0)
}

/// Outlier policy over a numeric series: is the last point unusual?
pub trait AnomalyDetector: Send + Sync {
    fn is_outlier(&self, series: &[f64]) -> bool;
}

/// One-step-ahead forecast. Ok(None) means insufficient history; Err is an
/// internal scoring failure and degrades the field, never the run.
pub trait Forecaster: Send + Sync {
    fn forecast_next(&self, series: &[f64]) -> anyhow::Result<Option<f64>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ZScoreDetector {
    pub threshold: f64,
    pub min_points: usize,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            min_points: 10,
        }
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn is_outlier(&self, series: &[f64]) -> bool {
        if series.len() < self.min_points {
            return false;
        }
        let Some((last, _)) = series.split_last() else {
            return false;
        };
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev < 1e-9 {
            return false;
        }
        ((last - mean) / std_dev).abs() > self.threshold
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDetector;

impl AnomalyDetector for NoopDetector {
    fn is_outlier(&self, _series: &[f64]) -> bool {
        false
    }
}

/// Exponential smoothing stand-in for the forecasting model.
#[derive(Debug, Clone, Copy)]
pub struct SmoothingForecaster {
    pub alpha: f64,
    pub min_points: usize,
}

impl Default for SmoothingForecaster {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            min_points: MIN_FORECAST_POINTS,
        }
    }
}

impl Forecaster for SmoothingForecaster {
    fn forecast_next(&self, series: &[f64]) -> anyhow::Result<Option<f64>> {
        if series.len() < self.min_points {
            return Ok(None);
        }
        let mut level = series[0];
        for value in &series[1..] {
            level = self.alpha * value + (1.0 - self.alpha) * level;
        }
        if !level.is_finite() {
            anyhow::bail!("smoothing level diverged to a non-finite value");
        }
        Ok(Some(level))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoForecast;

impl Forecaster for NoForecast {
    fn forecast_next(&self, _series: &[f64]) -> anyhow::Result<Option<f64>> {
        Ok(None)
    }
}

/// Scoring capability injected into the orchestrator, selected once at
/// startup.
pub struct DerivationStrategy {
    pub detector: Box<dyn AnomalyDetector>,
    pub forecaster: Box<dyn Forecaster>,
}

impl DerivationStrategy {
    pub fn full() -> Self {
        Self {
            detector: Box::new(ZScoreDetector::default()),
            forecaster: Box::new(SmoothingForecaster::default()),
        }
    }

    pub fn light() -> Self {
        Self {
            detector: Box::new(NoopDetector),
            forecaster: Box::new(NoForecast),
        }
    }

    pub fn for_mode(mode: DerivationMode) -> Self {
        match mode {
            DerivationMode::Full => Self::full(),
            DerivationMode::Light => Self::light(),
        }
    }
}

/// Health score and anomaly flag per record; forecast on the final record
/// only, when enough pH history exists.
pub fn derive_metrics(records: &[MergedRecord], strategy: &DerivationStrategy) -> Vec<OceanMetric> {
    let sst_series: Vec<f64> = records.iter().map(|r| r.sst).collect();
    let ph_series: Vec<f64> = records.iter().filter_map(|r| r.ph).collect();

    let mut out: Vec<OceanMetric> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| OceanMetric {
            date: record.date,
            latitude: record.latitude,
            longitude: record.longitude,
            sst: record.sst,
            dhw: record.dhw,
            ph: record.ph,
            health_score: health_score(record.reef_health_baseline, record.sst, record.dhw),
            anomaly: strategy.detector.is_outlier(&sst_series[..=idx]),
            forecast_ph: None,
        })
        .collect();

    if let Some(last) = out.last_mut() {
        match strategy.forecaster.forecast_next(&ph_series) {
            Ok(forecast) => last.forecast_ph = forecast,
            Err(err) => warn!(error = %err, "ph forecast failed, leaving the field null"),
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    runs_total: AtomicU64,
    runs_failed_total: AtomicU64,
    last_success_unix: AtomicI64,
    run_duration_ms_sum: AtomicU64,
    run_duration_count: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_total: u64,
    pub runs_failed_total: u64,
    /// Unix seconds of the last successful run; 0 when none yet.
    pub last_success_unix: i64,
    pub mean_run_duration_ms: u64,
    pub sources: Vec<SourceFetchSnapshot>,
}

impl PipelineMetrics {
    pub fn record_run_started(&self) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_succeeded(&self, finished_at: DateTime<Utc>, duration: Duration) {
        self.last_success_unix
            .store(finished_at.timestamp(), Ordering::Relaxed);
        self.run_duration_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.run_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, fetch: &FetchMetrics) -> MetricsSnapshot {
        let count = self.run_duration_count.load(Ordering::Relaxed);
        let sum = self.run_duration_ms_sum.load(Ordering::Relaxed);
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_failed_total: self.runs_failed_total.load(Ordering::Relaxed),
            last_success_unix: self.last_success_unix.load(Ordering::Relaxed),
            mean_run_duration_ms: if count == 0 { 0 } else { sum / count },
            sources: fetch.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Clean,
    Merge,
    Derive,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Clean => "clean",
            Stage::Merge => "merge",
            Stage::Derive => "derive",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Run-level failures. Fetching falls back, merging degrades, and
/// derivation nulls out, so only data quality and persistence can abort a
/// run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no observations survived cleaning")]
    EmptyAfterClean,
    #[error("persisting batch: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub observation_origin: DataOrigin,
    pub ph_origin: DataOrigin,
    pub reef_origin: DataOrigin,
    pub observations: usize,
    pub ph_readings: usize,
    pub reef_features: usize,
    pub merged: usize,
    pub persisted: u64,
}

/// Sequences the stages for one run and owns the in-flight dataset.
/// The store connection is built once at startup and injected here.
pub struct Orchestrator {
    config: PipelineConfig,
    fetcher: HttpFetcher,
    cache: PayloadCache,
    store: MetricStore,
    strategy: DerivationStrategy,
    metrics: Arc<PipelineMetrics>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, store: MetricStore) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(config.http_client_config())?;
        let cache = PayloadCache::new(config.cache_dir.clone());
        let strategy = DerivationStrategy::for_mode(config.derivation);
        Ok(Self {
            config,
            fetcher,
            cache,
            store,
            strategy,
            metrics: Arc::new(PipelineMetrics::default()),
        })
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.fetcher.metrics())
    }

    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_started = Instant::now();
        self.metrics.record_run_started();
        info!(%run_id, "pipeline run started");

        let result = self.run_stages(run_id, started_at).await;
        match &result {
            Ok(summary) => {
                self.metrics
                    .record_run_succeeded(summary.finished_at, run_started.elapsed());
                info!(
                    %run_id,
                    persisted = summary.persisted,
                    elapsed_ms = run_started.elapsed().as_millis() as u64,
                    "pipeline run succeeded",
                );
            }
            Err(err) => {
                self.metrics.record_run_failed();
                error!(%run_id, error = %err, "pipeline run failed");
            }
        }
        result
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<RunSummary, PipelineError> {
        let date = started_at.date_naive();

        // Point data first: the reef request's bbox derives from it.
        let stage_started = Instant::now();
        let observations = self
            .sst_source()
            .fetch(&self.fetcher, &self.cache, run_id)
            .await;
        let ph = self
            .ph_source()
            .fetch(&self.fetcher, &self.cache, run_id)
            .await;
        let bbox_hint = BoundingBox::from_drafts(&observations.records, BBOX_PADDING_DEG);
        let reefs = self
            .reef_source()
            .fetch(&self.fetcher, &self.cache, run_id, bbox_hint)
            .await;
        log_stage(run_id, Stage::Fetch, stage_started);

        let stage_started = Instant::now();
        let cleaned_observations = clean_observations(&observations.records, date);
        let cleaned_ph = clean_ph(&ph.records, date);
        let cleaned_reefs = clean_reefs(reefs.records);
        log_stage(run_id, Stage::Clean, stage_started);
        if cleaned_observations.is_empty() {
            return Err(PipelineError::EmptyAfterClean);
        }

        let stage_started = Instant::now();
        let observation_count = cleaned_observations.len();
        let ph_count = cleaned_ph.len();
        let reef_count = cleaned_reefs.len();
        let merged = integrate_ph(cleaned_observations, &cleaned_ph);
        let merged = spatial_merge(
            merged,
            (!cleaned_reefs.is_empty()).then_some(cleaned_reefs.as_slice()),
        );
        log_stage(run_id, Stage::Merge, stage_started);

        let stage_started = Instant::now();
        let metrics = derive_metrics(&merged, &self.strategy);
        log_stage(run_id, Stage::Derive, stage_started);

        let stage_started = Instant::now();
        let persisted = self.store.upsert_batch(&metrics).await?;
        log_stage(run_id, Stage::Persist, stage_started);

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            observation_origin: observations.origin,
            ph_origin: ph.origin,
            reef_origin: reefs.origin,
            observations: observation_count,
            ph_readings: ph_count,
            reef_features: reef_count,
            merged: merged.len(),
            persisted,
        })
    }

    fn sst_source(&self) -> SstSource {
        SstSource::new(SstSourceConfig {
            url: self.config.sst_url.clone(),
        })
    }

    fn ph_source(&self) -> PhSource {
        PhSource::new(PhSourceConfig {
            url: self.config.ph_url.clone(),
        })
    }

    fn reef_source(&self) -> ReefSource {
        ReefSource::new(ReefSourceConfig {
            wfs_url: self.config.reef_wfs_url.clone(),
            layer: self.config.reef_wfs_layer.clone(),
            bbox: self.config.reef_wfs_bbox,
        })
    }
}

fn log_stage(run_id: Uuid, stage: Stage, started: Instant) {
    info!(
        %run_id,
        stage = %stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage complete",
    );
}

/// One tick: skip when a run is already in flight, and never let a run
/// failure escape into the scheduler.
async fn run_tick(orchestrator: Arc<Orchestrator>, gate: Arc<tokio::sync::Mutex<()>>) {
    let Ok(_guard) = gate.try_lock() else {
        warn!("previous pipeline run still in flight, skipping tick");
        return;
    };
    match orchestrator.run_once().await {
        Ok(summary) => info!(
            run_id = %summary.run_id,
            persisted = summary.persisted,
            "scheduled run complete",
        ),
        Err(err) => error!(error = %err, "scheduled run failed"),
    }
}

pub async fn build_scheduler(
    orchestrator: Arc<Orchestrator>,
    policy: SchedulePolicy,
) -> anyhow::Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let gate = Arc::new(tokio::sync::Mutex::new(()));

    let job = match policy {
        SchedulePolicy::Daily { hour, minute } => {
            let cron = format!("0 {minute} {hour} * * *");
            Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let orchestrator = orchestrator.clone();
                let gate = gate.clone();
                Box::pin(async move { run_tick(orchestrator, gate).await })
            })
            .with_context(|| format!("creating daily job for cron {cron}"))?
        }
        SchedulePolicy::Interval { every } => {
            Job::new_repeated_async(every, move |_uuid, _lock| {
                let orchestrator = orchestrator.clone();
                let gate = gate.clone();
                Box::pin(async move { run_tick(orchestrator, gate).await })
            })
            .context("creating interval job")?
        }
    };

    sched.add(job).await.context("adding pipeline job")?;
    Ok(sched)
}

/// Long-lived scheduler loop; returns after a shutdown signal. Pipeline
/// failures are logged per tick and never terminate the process.
pub async fn run_scheduler_until_shutdown(
    orchestrator: Arc<Orchestrator>,
    policy: SchedulePolicy,
) -> anyhow::Result<()> {
    let mut sched = build_scheduler(orchestrator, policy).await?;
    sched.start().await.context("starting scheduler")?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

pub async fn run_pipeline_once_from_env() -> anyhow::Result<RunSummary> {
    let config = PipelineConfig::from_env();
    let store = MetricStore::connect(&config.store_config())
        .await
        .context("connecting metric store")?;
    store.ensure_schema().await.context("ensuring schema")?;
    let orchestrator = Orchestrator::new(config, store)?;
    Ok(orchestrator.run_once().await?)
}

pub async fn run_scheduler_from_env() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let schedule = config.schedule;
    let store = MetricStore::connect(&config.store_config())
        .await
        .context("connecting metric store")?;
    store.ensure_schema().await.context("ensuring schema")?;
    let orchestrator = Arc::new(Orchestrator::new(config, store)?);
    run_scheduler_until_shutdown(orchestrator, schedule).await
}
