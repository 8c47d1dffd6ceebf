// author: kodeholic (powered by Claude)
// 통화 REST API
//
//   POST /v1/calls             → callId 발급 (Authorization: Bearer <secret>)
//   GET  /v1/calls?limit=N     → 통화 이력 (최신순)
//   GET  /v1/calls/{call_id}   → 통화 상세

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use crate::config;
use crate::protocol::message::{ApiResponse, InitiateCallData, InitiateCallRequest};
use crate::trace::TraceEvent;

use super::dto::{CallListQuery, CallSummary};
use super::state::HttpState;

/// 기본 목록 크기
const DEFAULT_LIST_LIMIT: usize = 50;

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers.get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == config::secret_key())
        .unwrap_or(false)
}

fn fail(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(ApiResponse::<InitiateCallData>::fail(message))).into_response()
}

/// POST /v1/calls
pub async fn initiate_call(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Result<Json<InitiateCallRequest>, JsonRejection>,
) -> impl IntoResponse {
    if !bearer_ok(&headers) {
        warn!("[api] POST /v1/calls unauthorized");
        return fail(StatusCode::UNAUTHORIZED, "invalid token");
    }

    let Json(req) = match body {
        Ok(b)  => b,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e.body_text()),
    };
    if req.target_user_id.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "targetUserId is required");
    }

    let record = state.call_registry.create(&req.target_user_id, req.call_type, req.settings);
    info!("[api] call created call_id={} target={} type={}", record.call_id, req.target_user_id, req.call_type);
    state.trace_hub.publish(TraceEvent::system(
        &record.call_id, &req.target_user_id, "initiate", req.call_type.as_str(),
    ));

    (
        StatusCode::CREATED,
        Json(ApiResponse::ok(InitiateCallData { call_id: record.call_id }, "call created")),
    ).into_response()
}

/// GET /v1/calls
pub async fn list_calls(
    State(state): State<HttpState>,
    Query(query): Query<CallListQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let list: Vec<CallSummary> = state.call_registry
        .list(limit)
        .iter()
        .map(CallSummary::from)
        .collect();
    Json(list)
}

/// GET /v1/calls/{call_id}
pub async fn get_call(
    State(state): State<HttpState>,
    Path(call_id): Path<String>,
) -> impl IntoResponse {
    match state.call_registry.get(&call_id) {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({
            "error": format!("Call not found: {}", call_id)
        }))).into_response(),
    }
}
