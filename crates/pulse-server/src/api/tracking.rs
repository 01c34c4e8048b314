use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use pulse_core::Run;
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_track_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct StartRunRequest {
    /// Restrict the run to one subject slug.
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct StopData {
    stopped: bool,
}

/// Parse the optional start body; an empty body starts a full run.
fn parse_start_body(body: &[u8]) -> Result<StartRunRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRunRequest::default());
    }
    serde_json::from_slice(body)
}

pub(super) async fn start_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<Run>>), ApiError> {
    let request = parse_start_body(&body).map_err(|e| {
        ApiError::new(
            req_id.0.clone(),
            "bad_request",
            format!("invalid request body: {e}"),
        )
    })?;
    let subject = request
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let run = state
        .tracker
        .start(subject)
        .await
        .map_err(|e| map_track_error(req_id.0.clone(), &e))?;

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(req_id.0, run))))
}

pub(super) async fn stop_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<StopData>> {
    let stopped = state.tracker.stop();
    Json(ApiResponse::new(req_id.0, StopData { stopped }))
}

pub(super) async fn run_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Option<Run>>>, ApiError> {
    let run = state
        .tracker
        .status()
        .await
        .map_err(|e| map_track_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, run)))
}

pub(super) async fn list_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<Run>>>, ApiError> {
    let runs = state
        .tracker
        .recent_runs(normalize_limit(query.limit))
        .await
        .map_err(|e| map_track_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, runs)))
}

#[cfg(test)]
mod tests {
    use super::parse_start_body;

    #[test]
    fn empty_body_starts_full_run() {
        assert!(parse_start_body(b"").expect("empty").subject.is_none());
        assert!(parse_start_body(b" \n").expect("blank").subject.is_none());
    }

    #[test]
    fn body_may_name_a_subject() {
        let request = parse_start_body(br#"{"subject":"acme"}"#).expect("json");
        assert_eq!(request.subject.as_deref(), Some("acme"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_start_body(br#"{"competitor":"acme"}"#).is_err());
    }
}
