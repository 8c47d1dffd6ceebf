// author: kodeholic (powered by Claude)
// CallRegistry — 릴레이가 관찰한 통화 이력
//
// 상태 흐름:
//   created (POST /v1/calls) → ringing (call-offer 중계) → active (call-answer 중계) → ended
//   응답 전 종료: 수신자가 끊으면 rejected, 발신자가 끊거나 ring timeout 이면 missed
//
// 릴레이는 협상 내용에 관여하지 않는다. 관찰/조회 전용.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, trace};

use crate::config;
use crate::protocol::message::{CallSettings, MediaKind};
use crate::utils::{current_timestamp, random_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Created,
    Ringing,
    Active,
    Ended,
    Missed,
    Rejected,
}

impl CallStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, CallStatus::Created | CallStatus::Ringing | CallStatus::Active)
    }

    pub fn is_unanswered(&self) -> bool {
        matches!(self, CallStatus::Created | CallStatus::Ringing)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Created  => "created",
            CallStatus::Ringing  => "ringing",
            CallStatus::Active   => "active",
            CallStatus::Ended    => "ended",
            CallStatus::Missed   => "missed",
            CallStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id:     String,
    /// REST 로 생성된 직후에는 모름 (offer 중계 시 채움)
    pub caller_id:   Option<String>,
    pub callee_id:   String,
    pub call_type:   MediaKind,
    pub settings:    CallSettings,
    pub status:      CallStatus,
    pub created_at:  u64,
    pub ringing_at:  Option<u64>,
    pub answered_at: Option<u64>,
    pub ended_at:    Option<u64>,
    pub ended_by:    Option<String>,
}

impl CallRecord {
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.answered_at, self.ended_at) {
            (Some(a), Some(e)) => Some(e.saturating_sub(a)),
            _ => None,
        }
    }

    /// user 가 이 통화의 당사자면 상대방 id
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.callee_id == user_id {
            return self.caller_id.as_deref();
        }
        if self.caller_id.as_deref() == Some(user_id) {
            return Some(&self.callee_id);
        }
        None
    }

    fn close(&mut self, status: CallStatus, by: Option<&str>) {
        self.status   = status;
        self.ended_at = Some(current_timestamp());
        self.ended_by = by.map(str::to_string);
    }
}

pub struct CallRegistry {
    calls: RwLock<HashMap<String, CallRecord>>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        trace!("Initializing CallRegistry");
        Self { calls: RwLock::new(HashMap::new()) }
    }

    /// POST /v1/calls: 새 callId 발급
    pub fn create(&self, callee_id: &str, call_type: MediaKind, settings: CallSettings) -> CallRecord {
        let record = CallRecord {
            call_id:     format!("call_{}", random_id(config::CALL_ID_LEN)),
            caller_id:   None,
            callee_id:   callee_id.to_string(),
            call_type,
            settings,
            status:      CallStatus::Created,
            created_at:  current_timestamp(),
            ringing_at:  None,
            answered_at: None,
            ended_at:    None,
            ended_by:    None,
        };
        self.calls.write().unwrap().insert(record.call_id.clone(), record.clone());
        debug!("[calls] created call_id={} callee={} type={}", record.call_id, callee_id, call_type);
        record
    }

    /// call-offer 중계. REST 를 거치지 않은 callId 면 새로 기록
    pub fn on_offer(&self, call_id: &str, caller_id: &str, callee_id: &str, call_type: Option<MediaKind>) {
        let now = current_timestamp();
        let mut calls = self.calls.write().unwrap();
        let record = calls.entry(call_id.to_string()).or_insert_with(|| {
            let kind = call_type.unwrap_or(MediaKind::Voice);
            CallRecord {
                call_id:     call_id.to_string(),
                caller_id:   None,
                callee_id:   callee_id.to_string(),
                call_type:   kind,
                settings:    CallSettings::for_kind(kind),
                status:      CallStatus::Created,
                created_at:  now,
                ringing_at:  None,
                answered_at: None,
                ended_at:    None,
                ended_by:    None,
            }
        });
        if record.caller_id.is_none() {
            record.caller_id = Some(caller_id.to_string());
        }
        if record.status == CallStatus::Created {
            record.status     = CallStatus::Ringing;
            record.ringing_at = Some(now);
        }
    }

    /// call-answer 중계
    pub fn on_answer(&self, call_id: &str) -> Option<CallStatus> {
        let mut calls = self.calls.write().unwrap();
        let record = calls.get_mut(call_id)?;
        if record.status.is_unanswered() {
            record.status      = CallStatus::Active;
            record.answered_at = Some(current_timestamp());
        }
        Some(record.status)
    }

    /// call-end 중계 또는 연결 끊김. 이미 닫힌 통화면 상태 변화 없음
    pub fn on_end(&self, call_id: &str, by: &str) -> Option<CallStatus> {
        let mut calls = self.calls.write().unwrap();
        let record = calls.get_mut(call_id)?;
        let next = match record.status {
            CallStatus::Active => CallStatus::Ended,
            s if s.is_unanswered() && record.callee_id == by => CallStatus::Rejected,
            s if s.is_unanswered() => CallStatus::Missed,
            closed => return Some(closed),
        };
        record.close(next, Some(by));
        debug!("[calls] call_id={} -> {} (by {})", call_id, next, by);
        Some(next)
    }

    /// 응답 없이 timeout 지난 통화 → missed. 닫힌 레코드 반환
    pub fn expire_unanswered(&self, ring_timeout_ms: u64) -> Vec<CallRecord> {
        let now = current_timestamp();
        let mut calls = self.calls.write().unwrap();
        calls.values_mut()
            .filter(|r| r.status.is_unanswered() && now.saturating_sub(r.created_at) >= ring_timeout_ms)
            .map(|r| {
                r.close(CallStatus::Missed, None);
                r.clone()
            })
            .collect()
    }

    /// user 가 당사자인 열린 통화: (call_id, 상대방)
    pub fn open_calls_of(&self, user_id: &str) -> Vec<(String, Option<String>)> {
        self.calls.read().unwrap()
            .values()
            .filter(|r| r.status.is_open())
            .filter(|r| r.callee_id == user_id || r.caller_id.as_deref() == Some(user_id))
            .map(|r| (r.call_id.clone(), r.counterpart_of(user_id).map(str::to_string)))
            .collect()
    }

    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.calls.read().unwrap().get(call_id).cloned()
    }

    /// 최신순 목록
    pub fn list(&self, limit: usize) -> Vec<CallRecord> {
        let mut list: Vec<CallRecord> = self.calls.read().unwrap().values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        list
    }

    pub fn count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn open_count(&self) -> usize {
        self.calls.read().unwrap().values().filter(|r| r.status.is_open()).count()
    }

    /// 보관 한도 초과분 중 닫힌 통화부터 오래된 순으로 제거
    pub fn prune(&self, max_history: usize) -> usize {
        let mut calls = self.calls.write().unwrap();
        if calls.len() <= max_history {
            return 0;
        }
        let mut closed: Vec<(u64, String)> = calls.values()
            .filter(|r| !r.status.is_open())
            .map(|r| (r.created_at, r.call_id.clone()))
            .collect();
        closed.sort();

        let excess = calls.len() - max_history;
        let mut removed = 0;
        for (_, id) in closed.into_iter().take(excess) {
            calls.remove(&id);
            removed += 1;
        }
        removed
    }
}
