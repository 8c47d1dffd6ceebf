// author: kodeholic (powered by Claude)
// Admin REST API 핸들러
//
//   GET /admin/status    → 서버 상태 요약
//   GET /admin/users     → 접속 User 목록

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::atomic::Ordering;

use crate::utils::current_timestamp;

use super::dto::*;
use super::state::HttpState;

/// GET /admin/status
pub async fn admin_status(State(state): State<HttpState>) -> impl IntoResponse {
    let now_ms      = current_timestamp();
    let uptime_secs = now_ms.saturating_sub(state.start_time_ms) / 1000;

    Json(ServerStatus {
        uptime_secs,
        user_count: state.user_hub.count(),
        call_count: state.call_registry.count(),
        open_calls: state.call_registry.open_count(),
    })
}

/// GET /admin/users
pub async fn admin_list_users(State(state): State<HttpState>) -> impl IntoResponse {
    let now = current_timestamp();
    let mut list: Vec<AdminUserSummary> = state.user_hub
        .all_users()
        .into_iter()
        .map(|(uid, user)| {
            let last_seen_ms = user.last_seen.load(Ordering::Relaxed);
            let open_calls   = state.call_registry.open_calls_of(&uid).len();
            AdminUserSummary {
                user_id:      uid,
                session_id:   user.session_id.clone(),
                connected_at: user.connected_at,
                last_seen_ms,
                idle_secs:    now.saturating_sub(last_seen_ms) / 1000,
                open_calls,
            }
        })
        .collect();
    list.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    Json(list)
}
