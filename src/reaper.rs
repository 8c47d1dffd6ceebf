// author: kodeholic (powered by Claude)
// 좀비 세션 / 무응답 통화 정리 태스크
//
// 주기마다 수행:
//   1. 좀비 User (WS 하트비트 없음) 제거 + 열린 통화 종료 통지
//   2. ring timeout 지난 통화 missed 처리 + 양측에 call-end
//   3. 통화 이력 보관 한도 초과분 정리

use std::sync::Arc;
use tracing::info;

use crate::config;
use crate::core::{CallRegistry, UserHub};
use crate::protocol::relay::{end_calls_for_user, notify_call_end};
use crate::trace::TraceHub;

pub async fn run_zombie_reaper(
    user_hub:        Arc<UserHub>,
    call_registry:   Arc<CallRegistry>,
    trace_hub:       Arc<TraceHub>,
    ring_timeout_ms: u64,
) {
    let interval  = tokio::time::Duration::from_millis(config::REAPER_INTERVAL_MS);
    let mut timer = tokio::time::interval(interval);
    timer.tick().await; // 첫 틱 skip (startup 시 즉시 실행 방지)

    info!("[zombie-reaper] Started (interval={}ms, timeout={}ms, ring={}ms)",
        config::REAPER_INTERVAL_MS, config::ZOMBIE_TIMEOUT_MS, ring_timeout_ms);

    loop {
        timer.tick().await;
        reap_once(&user_hub, &call_registry, &trace_hub, config::ZOMBIE_TIMEOUT_MS, ring_timeout_ms).await;
    }
}

/// 정리 1회. (좀비 user 수, 만료 통화 수, 제거된 이력 수)
pub async fn reap_once(
    user_hub:        &UserHub,
    call_registry:   &CallRegistry,
    trace_hub:       &TraceHub,
    zombie_timeout:  u64,
    ring_timeout_ms: u64,
) -> (usize, usize, usize) {
    // 1. 좀비 User
    let dead_users = user_hub.find_zombies(zombie_timeout);
    for uid in &dead_users {
        user_hub.unregister(uid);
        end_calls_for_user(user_hub, call_registry, trace_hub, uid, "peer timed out").await;
        info!("[zombie-reaper] user={} removed (no heartbeat)", uid);
    }

    // 2. 무응답 통화
    let expired = call_registry.expire_unanswered(ring_timeout_ms);
    for record in &expired {
        notify_call_end(user_hub, trace_hub, &record.call_id, &record.callee_id, "ring timeout").await;
        if let Some(caller) = &record.caller_id {
            notify_call_end(user_hub, trace_hub, &record.call_id, caller, "ring timeout").await;
        }
        info!("[zombie-reaper] call_id={} missed (ring timeout)", record.call_id);
    }

    // 3. 이력 정리
    let pruned = call_registry.prune(config::MAX_CALL_HISTORY);

    if !dead_users.is_empty() || !expired.is_empty() || pruned > 0 {
        info!("[zombie-reaper] Cleaned {} user(s), {} call(s) expired, {} record(s) pruned",
            dead_users.len(), expired.len(), pruned);
    }
    (dead_users.len(), expired.len(), pruned)
}
