// author: kodeholic (powered by Claude)
//
// TraceHub — 통화 시그널링 관찰 버스
//
// 릴레이가 받은 메시지(in), 상대에게 넘긴 결과(out), 릴레이 자체 판단(sys:
// 접속 끊김, ring timeout) 을 통화 단위 이벤트로 흘려보낸다. wctrace 가 SSE 로 구독.
// 구독자가 없거나 느려도 릴레이는 기다리지 않는다.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::utils::current_timestamp;

/// 느린 구독자 몫으로 보유하는 이벤트 수
const TRACE_BUF: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceDir {
    In,
    Out,
    Sys,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Unix millis
    pub ts:      u64,
    pub dir:     TraceDir,
    /// identify 등 통화 밖 메시지는 None
    pub call_id: Option<String>,
    /// 이벤트를 보낸(in) 또는 받는(out, sys) 쪽
    pub user_id: Option<String>,
    /// 통화 상대. 릴레이가 양쪽을 아는 경우만
    pub peer_id: Option<String>,
    pub event:   String,
    pub summary: String,
}

impl TraceEvent {
    fn build(dir: TraceDir, call_id: Option<&str>, user_id: Option<&str>, peer_id: Option<&str>, event: &str, summary: String) -> Self {
        Self {
            ts:      current_timestamp(),
            dir,
            call_id: call_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
            peer_id: peer_id.map(str::to_string),
            event:   event.to_string(),
            summary,
        }
    }

    /// 클라이언트 → 릴레이 수신
    pub fn inbound(call_id: Option<&str>, user_id: Option<&str>, event: &str) -> Self {
        Self::build(TraceDir::In, call_id, user_id, None, event, String::new())
    }

    /// 릴레이 → 대상 전달. 대상 오프라인이면 summary 에 표시
    pub fn relayed(call_id: &str, from: &str, to: &str, event: &str, delivered: bool) -> Self {
        let summary = if delivered {
            format!("{} -> {}", from, to)
        } else {
            format!("{} -> {} (offline)", from, to)
        };
        Self::build(TraceDir::Out, Some(call_id), Some(to), Some(from), event, summary)
    }

    /// 릴레이가 스스로 만든 통화 이벤트 (reaper, 연결 종료 정리)
    pub fn system(call_id: &str, user_id: &str, event: &str, reason: impl Into<String>) -> Self {
        Self::build(TraceDir::Sys, Some(call_id), Some(user_id), None, event, reason.into())
    }

    pub fn belongs_to(&self, call_id: &str) -> bool {
        self.call_id.as_deref() == Some(call_id)
    }

    /// 보낸 쪽이든 상대든 user 가 관련된 이벤트인지
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) || self.peer_id.as_deref() == Some(user_id)
    }
}

pub struct TraceHub {
    tx: broadcast::Sender<TraceEvent>,
}

impl TraceHub {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(TRACE_BUF);
        Arc::new(Self { tx })
    }

    pub fn publish(&self, event: TraceEvent) {
        let _ = self.tx.send(event);
    }

    /// SSE 연결마다 호출
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.tx.subscribe()
    }
}
