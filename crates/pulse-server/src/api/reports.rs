use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use pulse_core::Report;
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{map_track_error, normalize_limit, ApiError, ApiResponse, AppState};

const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
pub(super) struct WindowQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StoredQuery {
    pub limit: Option<usize>,
}

fn parse_bound(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| format!("'{name}' must be an RFC 3339 timestamp: {e}"))
        })
        .transpose()
}

/// Resolve the requested window; `to` defaults to now and `from` to seven days before `to`.
fn resolve_window(
    query: &WindowQuery,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let to = parse_bound("to", query.to.as_deref())?.unwrap_or(now);
    let from = parse_bound("from", query.from.as_deref())?
        .unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
    Ok((from, to))
}

/// Aggregate changes detected in `[from, to)` on demand. Nothing is stored.
pub(super) async fn aggregate_window(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let (from, to) = resolve_window(&query, Utc::now())
        .map_err(|message| ApiError::new(req_id.0.clone(), "bad_request", message))?;

    let report = pulse_tracker::build_report(state.tracker.stores().changes.as_ref(), from, to)
        .await
        .map_err(|e| map_track_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(req_id.0, report)))
}

pub(super) async fn list_stored_reports(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<StoredQuery>,
) -> Result<Json<ApiResponse<Vec<Report>>>, ApiError> {
    let reports = state
        .tracker
        .stored_reports(normalize_limit(query.limit))
        .await
        .map_err(|e| map_track_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, reports)))
}
