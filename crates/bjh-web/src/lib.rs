//! HTTP surface: the public job feed and the scheduler trigger.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bjh_core::{keys, Job, RunReport};
use bjh_storage::{get_json, FileStore, KeyValueStore};
use bjh_sync::{SyncConfig, SyncError, SyncPipeline};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "bjh-web";

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    /// Shared secret for `/api/cron`. Unset means the trigger is open.
    pub cron_secret: Option<String>,
    pub sync: SyncConfig,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("BJH_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            cron_secret: std::env::var("CRON_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            sync: SyncConfig::from_env(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub cron_secret: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, cron_secret: Option<String>) -> Self {
        Self {
            pipeline,
            cron_secret,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobsResponse {
    jobs: Vec<Job>,
    source: &'static str,
    last_updated: Option<String>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct CronResponse {
    success: bool,
    #[serde(flatten)]
    report: RunReport,
}

#[derive(Debug, Default, Deserialize)]
struct CronQuery {
    secret: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", get(jobs_handler))
        .route("/api/cron", get(cron_handler).post(cron_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = WebConfig::from_env();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.sync.store_dir.clone()));
    let pipeline = SyncPipeline::new(config.sync, store)?;
    if config.cron_secret.is_none() {
        warn!("CRON_SECRET is not set; /api/cron accepts unauthenticated triggers");
    }
    let state = AppState::new(Arc::new(pipeline), config.cron_secret);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn jobs_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.pipeline.store().as_ref();
    let body = match load_live(store).await {
        Ok(Some((jobs, last_updated))) => JobsResponse {
            count: jobs.len(),
            jobs,
            source: "live",
            last_updated,
        },
        Ok(None) => fallback(&state),
        Err(err) => {
            warn!(error = %err, "live job set unavailable; serving baseline");
            fallback(&state)
        }
    };
    no_store(Json(body).into_response())
}

/// The live set and its fetch timestamp, or `None` when nothing has been
/// persisted yet or the last persisted set is empty.
async fn load_live(store: &dyn KeyValueStore) -> anyhow::Result<Option<(Vec<Job>, Option<String>)>> {
    let jobs: Option<Vec<Job>> = get_json(store, keys::LIVE_JOBS).await?;
    let Some(jobs) = jobs.filter(|j| !j.is_empty()) else {
        return Ok(None);
    };
    let last_updated: Option<String> = get_json(store, keys::LAST_FETCH).await?;
    Ok(Some((jobs, last_updated)))
}

fn fallback(state: &AppState) -> JobsResponse {
    let jobs = state.pipeline.baseline().to_vec();
    JobsResponse {
        count: jobs.len(),
        jobs,
        source: "fallback",
        last_updated: None,
    }
}

async fn cron_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Response {
    if !authorized(state.cron_secret.as_deref(), &headers, query.secret.as_deref()) {
        warn!("rejected cron trigger with missing or wrong secret");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }

    // The run is detached from the request so a dropped connection cannot
    // cancel it between writes.
    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move { pipeline.run_once().await }).await;

    let resp = match outcome {
        Ok(Ok(report)) => (
            StatusCode::OK,
            Json(CronResponse {
                success: true,
                report,
            }),
        )
            .into_response(),
        Ok(Err(SyncError::AlreadyRunning)) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "error": SyncError::AlreadyRunning.to_string() })),
        )
            .into_response(),
        Ok(Err(SyncError::Failed { report, .. })) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CronResponse {
                success: false,
                report: *report,
            }),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "sync task aborted");
            server_error(anyhow::anyhow!("sync task aborted: {err}"))
        }
    };
    no_store(resp)
}

/// Accepts `Authorization: Bearer <secret>` or `?secret=<secret>`.
fn authorized(expected: Option<&str>, headers: &HeaderMap, query_secret: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer == Some(expected) || query_secret == Some(expected)
}

fn no_store(mut resp: Response) -> Response {
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    resp
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}
