// author: kodeholic (powered by Claude)
// HTTP 응답 DTO — Admin / 통화 조회 공용

use serde::{Deserialize, Serialize};

use crate::core::CallRecord;

// ----------------------------------------------------------------------------
// [통화 조회]
// ----------------------------------------------------------------------------

/// GET /v1/calls?limit=N
#[derive(Deserialize)]
pub struct CallListQuery {
    pub limit: Option<usize>,
}

/// GET /v1/calls 아이템
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CallSummary {
    pub call_id:     String,
    pub caller_id:   Option<String>,
    pub callee_id:   String,
    pub call_type:   String,
    pub status:      String,
    pub created_at:  u64,
    pub duration_ms: Option<u64>,
}

impl From<&CallRecord> for CallSummary {
    fn from(r: &CallRecord) -> Self {
        Self {
            call_id:     r.call_id.clone(),
            caller_id:   r.caller_id.clone(),
            callee_id:   r.callee_id.clone(),
            call_type:   r.call_type.to_string(),
            status:      r.status.to_string(),
            created_at:  r.created_at,
            duration_ms: r.duration_ms(),
        }
    }
}

// ----------------------------------------------------------------------------
// [Admin]
// ----------------------------------------------------------------------------

/// GET /admin/status
#[derive(Serialize, Deserialize, Debug)]
pub struct ServerStatus {
    pub uptime_secs: u64,
    pub user_count:  usize,
    pub call_count:  usize,
    pub open_calls:  usize, // created/ringing/active 상태 통화 수
}

/// GET /admin/users 아이템
#[derive(Serialize, Deserialize, Debug)]
pub struct AdminUserSummary {
    pub user_id:      String,
    pub session_id:   String,
    pub connected_at: u64,
    pub last_seen_ms: u64,   // Unix millis
    pub idle_secs:    u64,   // 마지막 heartbeat 이후 경과 초
    pub open_calls:   usize,
}
