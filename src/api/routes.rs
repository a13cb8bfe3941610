use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::store::days_before;
use crate::db::Storage;
use crate::error::AppError;
use crate::pipeline::Pipeline;
use crate::types::{CycleReport, RecordFilter, StoredDeviceRecord};

#[derive(Clone)]
pub struct ApiState {
    pub storage: Storage,
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/records", get(get_records))
        .route("/records/latest", get(get_latest_records))
        .route("/sources", get(get_sources))
        .route("/scrape", post(post_scrape))
        .route("/scrape/:source", post(post_scrape_source))
        .route("/reset", post(post_reset))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LatestQuery {
    pub days: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub records: i64,
    pub cycle_running: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_inserted: u64,
    pub cycles_completed: u64,
}

#[derive(Serialize)]
pub struct SourceResponse {
    pub name: &'static str,
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let records = state.storage.count().await?;
    let health = state.pipeline.health();
    let last_ms = health.last_cycle_at_ms();
    let last_cycle_at = if last_ms > 0 { DateTime::<Utc>::from_timestamp_millis(last_ms) } else { None };

    Ok(Json(HealthResponse {
        status: "ok",
        records,
        cycle_running: health.cycle_running(),
        last_cycle_at,
        last_cycle_inserted: health.last_cycle_inserted(),
        cycles_completed: health.cycles_completed(),
    }))
}

/// `?brand=&condition=&source=&since_days=&until_days=`. `source` may repeat and
/// may be comma-separated; the query is taken as pairs so repeats survive.
/// `until_days=N` keeps records scraped more than N days ago.
async fn get_records(
    State(state): State<ApiState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<StoredDeviceRecord>>, AppError> {
    let filter = records_filter(&params, Utc::now())?;
    let records = if filter.is_empty() {
        state.storage.all_records().await?
    } else {
        state.storage.query(&filter).await?
    };
    Ok(Json(records))
}

/// Records from the last `days` days (default 7).
async fn get_latest_records(
    State(state): State<ApiState>,
    Query(params): Query<LatestQuery>,
) -> Result<Json<Vec<StoredDeviceRecord>>, AppError> {
    let days = params.days.unwrap_or(7);
    if days < 0 {
        return Err(AppError::InvalidQuery("days must be non-negative".to_string()));
    }
    Ok(Json(state.storage.latest_records(days).await?))
}

fn records_filter(params: &[(String, String)], now: DateTime<Utc>) -> Result<RecordFilter, AppError> {
    let mut filter = RecordFilter::default();
    for (key, value) in params {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "brand" => filter.brand = Some(value.to_string()),
            "condition" => filter.condition = Some(value.to_string()),
            "source" => filter.sources.extend(
                value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            ),
            "since_days" => filter.since = Some(days_ago(key, value, now)?),
            "until_days" => filter.until = Some(days_ago(key, value, now)?),
            _ => {}
        }
    }
    Ok(filter)
}

/// `value` parsed as a day count and subtracted from `now`.
fn days_ago(key: &str, value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    value
        .parse::<i64>()
        .ok()
        .and_then(|days| days_before(now, days))
        .ok_or_else(|| AppError::InvalidQuery(format!("{key} must be a non-negative day count in range, got `{value}`")))
}

async fn get_sources(State(state): State<ApiState>) -> Json<Vec<SourceResponse>> {
    let sources = state
        .pipeline
        .registry()
        .iter()
        .map(|p| SourceResponse { name: p.name(), base_url: p.base_url().to_string() })
        .collect();
    Json(sources)
}

/// The cycle runs on its own task; a client that disconnects does not cancel it.
async fn post_scrape(State(state): State<ApiState>) -> Result<Json<CycleReport>, AppError> {
    Ok(Json(Arc::clone(&state.pipeline).run_all_detached().await?))
}

async fn post_scrape_source(
    State(state): State<ApiState>,
    Path(source): Path<String>,
) -> Result<Json<CycleReport>, AppError> {
    Ok(Json(Arc::clone(&state.pipeline).run_source_detached(source).await?))
}

async fn post_reset(State(state): State<ApiState>) -> Result<StatusCode, AppError> {
    state.storage.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::db::IngestWriter;
    use crate::pipeline::tests::canned_pipeline;
    use crate::types::{Condition, DeviceListing};

    async fn app() -> (Router, Storage) {
        let (pipeline, storage) = canned_pipeline().await;
        let state = ApiState { storage: storage.clone(), pipeline };
        (router(state), storage)
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn scrape_then_filter_records() {
        let (app, _) = app().await;

        let (status, report) = send(&app, "POST", "/scrape").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["inserted"], 3);
        assert_eq!(report["sources"].as_array().unwrap().len(), 3);

        let (_, all) = send(&app, "GET", "/records").await;
        assert_eq!(all.as_array().unwrap().len(), 3);

        let (_, gamma) = send(&app, "GET", "/records?source=Gamma&since_days=1").await;
        let gamma = gamma.as_array().unwrap();
        assert_eq!(gamma.len(), 1);
        assert_eq!(gamma[0]["model"], "iPhone 11");
        assert_eq!(gamma[0]["condition"], "Good");

        let (_, both) = send(&app, "GET", "/records?source=Alpha,Gamma&source=Nope&brand=apple").await;
        assert_eq!(both.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn latest_records_default_window() {
        let (app, _) = app().await;
        send(&app, "POST", "/scrape").await;
        let (status, latest) = send(&app, "GET", "/records/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest.as_array().unwrap().len(), 3);

        let (status, _) = send(&app, "GET", "/records/latest?days=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_since_days_is_a_client_error() {
        let (app, _) = app().await;
        let (status, _) = send(&app, "GET", "/records?since_days=soon").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn huge_day_counts_are_client_errors() {
        let (app, _) = app().await;
        for uri in [
            "/records/latest?days=100000000",
            "/records/latest?days=9223372036854775807",
            "/records?since_days=100000000000000",
            "/records?until_days=100000000",
        ] {
            let (status, _) = send(&app, "GET", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn until_days_keeps_only_older_records() {
        let (app, storage) = app().await;
        let old = DeviceListing {
            source: "Alpha".to_string(),
            brand: "Apple".to_string(),
            model: "iPhone X".to_string(),
            condition: Condition::Fair,
            price: 15000.0,
        };
        IngestWriter::new(storage).ingest_at(&[old], Utc::now() - Duration::days(3)).await;
        send(&app, "POST", "/scrape").await;

        let (status, records) = send(&app, "GET", "/records?until_days=1").await;
        assert_eq!(status, StatusCode::OK);
        let records = records.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["model"], "iPhone X");

        let (_, window) = send(&app, "GET", "/records?since_days=5&until_days=4").await;
        assert!(window.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scrape_keeps_running_after_the_client_goes_away() {
        let (pipeline, storage) = canned_pipeline().await;
        let app = router(ApiState { storage: storage.clone(), pipeline: Arc::clone(&pipeline) });

        let request = Request::builder().method("POST").uri("/scrape").body(Body::empty()).unwrap();
        // Stop waiting on the response almost at once.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(1), app.oneshot(request)).await;

        for _ in 0..200 {
            if pipeline.health().cycles_completed() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(pipeline.health().cycles_completed(), 1);
        assert_eq!(storage.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (app, _) = app().await;
        let (status, _) = send(&app, "POST", "/scrape/Nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, report) = send(&app, "POST", "/scrape/alpha").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["inserted"], 2);
    }

    #[tokio::test]
    async fn lists_sources_in_order() {
        let (app, _) = app().await;
        let (_, sources) = send(&app, "GET", "/sources").await;
        let names: Vec<_> = sources.as_array().unwrap().iter().map(|s| s["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Alpha", "Broken", "Gamma"]);
    }

    #[tokio::test]
    async fn reset_clears_records() {
        let (app, storage) = app().await;
        send(&app, "POST", "/scrape").await;
        let (status, _) = send(&app, "POST", "/reset").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(storage.count().await.unwrap(), 0);

        let (status, health) = send(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["records"], 0);
        assert_eq!(health["cycle_running"], false);
        assert_eq!(health["cycles_completed"], 1);
        assert_eq!(health["last_cycle_inserted"], 3);
    }

    #[test]
    fn filter_from_query_pairs() {
        let now = Utc::now();
        let params = vec![
            ("brand".to_string(), "Samsung".to_string()),
            ("source".to_string(), " Maple , Quikr ".to_string()),
            ("source".to_string(), "Flipkart".to_string()),
            ("condition".to_string(), "".to_string()),
            ("since_days".to_string(), "7".to_string()),
            ("until_days".to_string(), "2".to_string()),
        ];
        let filter = records_filter(&params, now).unwrap();
        assert_eq!(filter.brand.as_deref(), Some("Samsung"));
        assert_eq!(filter.sources, vec!["Maple", "Quikr", "Flipkart"]);
        assert!(filter.condition.is_none());
        assert_eq!(filter.since, Some(now - Duration::days(7)));
        assert_eq!(filter.until, Some(now - Duration::days(2)));
    }

    #[test]
    fn out_of_range_day_counts_are_rejected() {
        let now = Utc::now();
        for (key, value) in [("since_days", "-1"), ("since_days", "100000000"), ("until_days", "9223372036854775807")] {
            let params = vec![(key.to_string(), value.to_string())];
            assert!(matches!(records_filter(&params, now), Err(AppError::InvalidQuery(_))), "{key}={value}");
        }
    }
}
