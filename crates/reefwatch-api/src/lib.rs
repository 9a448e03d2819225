//! Read-only axum API over the persisted ocean metrics table.
//!
//! The pipeline is the only writer; these handlers observe whatever batch
//! committed last and never mutate anything.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Days, Utc};
use reefwatch_storage::MetricStore;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "reefwatch-api";

pub const DEFAULT_TIMESERIES_DAYS: u64 = 30;
pub const ANOMALY_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: MetricStore,
}

impl AppState {
    pub fn new(store: MetricStore) -> Self {
        Self { store }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/data/latest", get(latest_handler))
        .route("/data/timeseries", get(timeseries_handler))
        .route("/data/anomalies", get(anomalies_handler))
        .route("/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(store: MetricStore) -> anyhow::Result<()> {
    let port: u16 = std::env::var("REEFWATCH_API_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

async fn root_handler() -> Response {
    Json(json!({
        "status": "running",
        "version": "1.0.0",
        "service": "ReefWatch API",
    }))
    .into_response()
}

async fn health_handler() -> Response {
    Json(json!({"status": "healthy"})).into_response()
}

async fn latest_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.latest().await {
        Ok(Some(m)) => Json(json!({
            "date": m.date,
            "latitude": m.latitude,
            "longitude": m.longitude,
            "sst": m.sst,
            "dhw": m.dhw,
            "ph": m.ph,
            "health_score": m.health_score,
            "anomaly": m.anomaly,
            "forecast_ph": m.forecast_ph,
        }))
        .into_response(),
        Ok(None) => Json(json!({"error": "No data available"})).into_response(),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct TimeseriesQuery {
    days: Option<u64>,
}

async fn timeseries_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimeseriesQuery>,
) -> Response {
    let days = query.days.unwrap_or(DEFAULT_TIMESERIES_DAYS);
    let cutoff = Utc::now().date_naive() - Days::new(days);
    match state.store.timeseries_since(cutoff).await {
        Ok(rows) => {
            let body: Vec<_> = rows
                .iter()
                .map(|m| {
                    json!({
                        "date": m.date,
                        "latitude": m.latitude,
                        "longitude": m.longitude,
                        "sst": m.sst,
                        "ph": m.ph,
                        "health_score": m.health_score,
                        "anomaly": m.anomaly,
                    })
                })
                .collect();
            Json(body).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn anomalies_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.anomalies(ANOMALY_LIMIT).await {
        Ok(rows) => {
            let body: Vec<_> = rows
                .iter()
                .map(|m| {
                    json!({
                        "date": m.date,
                        "latitude": m.latitude,
                        "longitude": m.longitude,
                        "sst": m.sst,
                        "health_score": m.health_score,
                    })
                })
                .collect();
            Json(body).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.stats().await {
        Ok(stats) => Json(json!({
            "avg_sst": stats.avg_sst,
            "avg_ph": stats.avg_ph,
            "avg_health_score": stats.avg_health_score,
            "anomalies_detected": stats.anomalies_detected,
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use reefwatch_core::OceanMetric;
    use reefwatch_storage::{sqlite_url, StoreConfig};
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn seeded_app(dir: &std::path::Path) -> Router {
        let store = MetricStore::connect(&StoreConfig {
            database_url: sqlite_url(&dir.join("metrics.db")),
            sqlite_fallback_path: dir.join("fallback.db"),
        })
        .await
        .expect("connect");
        store.ensure_schema().await.expect("schema");

        let today = Utc::now().date_naive();
        store
            .upsert_batch(&[
                OceanMetric {
                    date: today,
                    latitude: 6.5,
                    longitude: 92.5,
                    sst: 28.2,
                    dhw: 0.5,
                    ph: Some(8.10),
                    health_score: 35.2,
                    anomaly: false,
                    forecast_ph: None,
                },
                OceanMetric {
                    date: today,
                    latitude: 6.6,
                    longitude: 92.6,
                    sst: 31.4,
                    dhw: 2.0,
                    ph: None,
                    health_score: 22.9,
                    anomaly: true,
                    forecast_ph: Some(8.05),
                },
            ])
            .await
            .expect("seed");

        app(AppState::new(store))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn health_and_root_respond() {
        let dir = tempdir().expect("tempdir");
        let app = seeded_app(dir.path()).await;

        let (status, body) = get_json(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "ReefWatch API");
    }

    #[tokio::test]
    async fn latest_returns_the_newest_row() {
        let dir = tempdir().expect("tempdir");
        let app = seeded_app(dir.path()).await;

        let (status, body) = get_json(app, "/data/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["latitude"], 6.6);
        assert_eq!(body["anomaly"], true);
        assert_eq!(body["forecast_ph"], 8.05);
    }

    #[tokio::test]
    async fn timeseries_respects_the_days_window() {
        let dir = tempdir().expect("tempdir");
        let app = seeded_app(dir.path()).await;

        let (status, body) = get_json(app.clone(), "/data/timeseries?days=7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().expect("array").len(), 2);

        let (_, body) = get_json(app, "/data/timeseries").await;
        assert_eq!(body.as_array().expect("array").len(), 2);
    }

    #[tokio::test]
    async fn anomalies_lists_flagged_rows_only() {
        let dir = tempdir().expect("tempdir");
        let app = seeded_app(dir.path()).await;

        let (status, body) = get_json(app, "/data/anomalies").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().expect("array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["latitude"], 6.6);
    }

    #[tokio::test]
    async fn stats_aggregate_the_table() {
        let dir = tempdir().expect("tempdir");
        let app = seeded_app(dir.path()).await;

        let (status, body) = get_json(app, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["anomalies_detected"], 1);
        let avg_sst = body["avg_sst"].as_f64().expect("avg_sst");
        assert!((avg_sst - 29.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_table_yields_placeholder_latest() {
        let dir = tempdir().expect("tempdir");
        let store = MetricStore::connect(&StoreConfig {
            database_url: sqlite_url(&dir.path().join("empty.db")),
            sqlite_fallback_path: dir.path().join("fallback.db"),
        })
        .await
        .expect("connect");
        store.ensure_schema().await.expect("schema");
        let app = app(AppState::new(store));

        let (status, body) = get_json(app, "/data/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "No data available");
    }
}
