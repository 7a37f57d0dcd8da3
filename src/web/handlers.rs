//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Status, Target};
use crate::scheduler::CheckError;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

/// Longest uptime window served, in hours (90 days).
const MAX_UPTIME_HOURS: u32 = 24 * 90;
const MAX_SERIES_DAYS: u32 = 365;
const MAX_LOG_LIMIT: u32 = 2000;

const DEFAULT_UPTIME_HOURS: u32 = 24;
const DEFAULT_SERIES_DAYS: u32 = 30;
const DEFAULT_LOG_LIMIT: u32 = 200;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to API clients as `{ok: false, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound,
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(e: CheckError) -> Self {
        match e {
            CheckError::Db(db) => db.into(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }
        (status, Json(json!({ "ok": false, "message": self.to_string() }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Require an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| ApiError::BadRequest(format!("invalid url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest("url must use http or https".to_string()));
    }
    if url.host_str().is_none() {
        return Err(ApiError::BadRequest("url must include a host".to_string()));
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// A missing or zero parameter means `default`.
fn or_default(value: Option<u32>, default: u32) -> u32 {
    value.filter(|v| *v > 0).unwrap_or(default)
}

fn log_limit(limit: Option<u32>) -> u32 {
    or_default(limit, DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT)
}

fn uptime_hours(hours: Option<u32>) -> u32 {
    or_default(hours, DEFAULT_UPTIME_HOURS).min(MAX_UPTIME_HOURS)
}

fn series_days(days: Option<u32>) -> u32 {
    or_default(days, DEFAULT_SERIES_DAYS).min(MAX_SERIES_DAYS)
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "time": Utc::now().to_rfc3339(),
        "intervalMinutes": state.config.interval_minutes,
    }))
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_list_apps(State(state): State<AppState>) -> ApiResult {
    let apps = state.store.get_targets()?;
    Ok(Json(json!({ "ok": true, "apps": apps })).into_response())
}

pub async fn handle_get_app(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let app = state.store.get_target(id)?;
    Ok(Json(json!({ "ok": true, "app": app })).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub alert_emails: Option<String>,
}

pub async fn handle_create_app(
    State(state): State<AppState>,
    req: Result<Json<AppRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = req?;
    let (Some(name), Some(url)) = (non_empty(req.name), non_empty(req.url)) else {
        return Err(ApiError::BadRequest("name and url required".to_string()));
    };
    let url = validate_url(&url)?;

    if state.store.find_target_by_url(&url)?.is_some() {
        return Err(ApiError::Conflict("URL already exists".to_string()));
    }

    let mut target = Target {
        name,
        url,
        created_at: Utc::now(),
        alert_emails: non_empty(req.alert_emails),
        ..Default::default()
    };
    state.store.add_target(&mut target)?;

    // Immediate first check; the response does not wait for it.
    state.scheduler.on_target_created(target.clone());

    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "app": target }))).into_response())
}

pub async fn handle_update_app(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    req: Result<Json<AppRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = req?;
    let mut target = state.store.get_target(id)?;

    if let Some(name) = non_empty(req.name) {
        target.name = name;
    }
    if let Some(url) = non_empty(req.url) {
        target.url = validate_url(&url)?;
    }
    if let Some(emails) = req.alert_emails {
        target.alert_emails = non_empty(Some(emails));
    }

    state.store.update_target(&target)?;
    let updated = state.store.get_target(id)?;
    Ok(Json(json!({ "ok": true, "app": updated })).into_response())
}

pub async fn handle_delete_app(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.store.delete_target(id)?;
    Ok(Json(json!({ "ok": true })).into_response())
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_check_app(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let target = state.store.get_target(id)?;
    let log = state.scheduler.check_one(&target).await?;
    Ok(Json(json!({ "ok": true, "log": log })).into_response())
}

pub async fn handle_check_all(State(state): State<AppState>) -> ApiResult {
    let summary = state.scheduler.check_all().await?;
    Ok(Json(json!({ "ok": true, "total": summary.total, "checked": summary.checked })).into_response())
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_get_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    state.store.get_target(id)?;
    let logs = state.store.recent_logs(id, log_limit(query.limit))?;
    Ok(Json(json!({ "ok": true, "logs": logs })).into_response())
}

pub async fn handle_diagnostics(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.store.get_target(id)?;
    let latest = state.store.recent_logs(id, 1)?.into_iter().next();
    let meta = latest.as_ref().and_then(|l| l.meta.clone());
    Ok(Json(json!({ "ok": true, "meta": meta, "log": latest })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default)]
    pub hours: Option<u32>,
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<UptimeQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    state.store.get_target(id)?;
    let uptime = state.aggregator.uptime_pct(id, uptime_hours(query.hours))?;
    Ok(Json(json!({ "ok": true, "uptime": uptime })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    #[serde(default)]
    pub days: Option<u32>,
}

pub async fn handle_uptime_series(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<SeriesQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    state.store.get_target(id)?;
    let series = state.aggregator.daily_series(id, series_days(query.days))?;
    Ok(Json(json!({ "ok": true, "series": series })).into_response())
}

pub async fn handle_summary(State(state): State<AppState>) -> ApiResult {
    let apps = state.store.get_targets()?;

    let mut rows = Vec::with_capacity(apps.len());
    let mut up = 0;
    let mut down = 0;
    let mut total_avg = 0.0;

    for app in &apps {
        let s = state.aggregator.summary(app.id, 24)?;
        if s.latest_status == Some(Status::Up) {
            up += 1;
        } else {
            down += 1;
        }
        total_avg += s.avg_response_time;

        rows.push(json!({
            "id": app.id,
            "name": app.name,
            "url": app.url,
            "uptime24h": s.window.pct(),
            "avgResponseTime24h": s.avg_response_time,
            "latestStatus": s.latest_status.map(|st| st.as_str()).unwrap_or("CHECKING"),
            "lastCheckedAt": s.last_checked_at,
        }));
    }

    let avg_all = if rows.is_empty() { 0.0 } else { total_avg / rows.len() as f64 };

    Ok(Json(json!({
        "ok": true,
        "summary": {
            "total": apps.len(),
            "up": up,
            "down": down,
            "avgResponseTimeAll": avg_all,
        },
        "apps": rows,
    }))
    .into_response())
}
