// author: kodeholic (powered by Claude)
// Call Session — 통화 1건의 협상 상태
//
// 상태 전이 (단방향, 역행 없음):
//   Idle → Initiating → OfferSent (발신) ─┐
//                     → OfferReceived (수신) ─┴→ AnswerExchanged → Connected
//   비종료 상태 어디서든 → Ended | Failed
//
// callId 는 한 번 정해지면 세션 수명 동안 바뀌지 않는다.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::call::media::{MediaStream, MediaTrack, TrackKind};
use crate::call::peer::{PeerSession, RemoteStream};
use crate::error::{CallError, CallResult};
use crate::protocol::message::{IceCandidate, MediaKind, SessionDescription};
use crate::utils::current_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Initiating,
    OfferSent,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            CallState::Idle            => 0,
            CallState::Initiating      => 1,
            CallState::OfferSent
            | CallState::OfferReceived => 2,
            CallState::AnswerExchanged => 3,
            CallState::Connected       => 4,
            CallState::Ended
            | CallState::Failed        => 5,
        }
    }

    /// 전진만 허용. 발신/수신 분기(OfferSent ↔ OfferReceived)는 서로 넘나들 수 없음
    pub fn can_transition_to(&self, next: CallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Idle            => "idle",
            CallState::Initiating      => "initiating",
            CallState::OfferSent       => "offer_sent",
            CallState::OfferReceived   => "offer_received",
            CallState::AnswerExchanged => "answer_exchanged",
            CallState::Connected       => "connected",
            CallState::Ended           => "ended",
            CallState::Failed          => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// 엔진 → UI 통지
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged { call_id: Option<String>, state: CallState },
    IncomingCall { call_id: String, caller_id: String, media_kind: MediaKind },
    LocalStream(MediaStream),
    RemoteStream(RemoteStream),
    Failed { call_id: Option<String>, error: CallError },
}

pub struct CallSession {
    /// 엔진 세대 번호: 비동기 continuation 의 liveness 판정 기준
    pub generation:       u64,
    call_id:              Option<String>,
    pub role:             CallRole,
    pub local_user_id:    String,
    pub remote_user_id:   String,
    pub media_kind:       MediaKind,
    state:                CallState,

    pub local_description:  Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// 피어 세션 생성 전에 도착한 원격 candidate
    pub pending_remote_candidates: VecDeque<IceCandidate>,
    /// offer/answer 송신 전에 수집된 로컬 candidate
    pub outgoing_candidates:       Vec<IceCandidate>,
    pub description_emitted:       bool,
    /// ICE connected 가 AnswerExchanged 보다 먼저 도착한 경우
    pub connectivity_up:           bool,

    pub local_stream: Option<MediaStream>,
    pub peer:         Option<Arc<PeerSession>>,

    pub created_at:   u64,
    pub connected_at: Option<u64>,
}

impl CallSession {
    fn new(generation: u64, role: CallRole, call_id: Option<String>, local: &str, remote: &str, kind: MediaKind) -> Self {
        Self {
            generation,
            call_id,
            role,
            local_user_id:  local.to_string(),
            remote_user_id: remote.to_string(),
            media_kind:     kind,
            state:          CallState::Initiating,
            local_description:         None,
            remote_description:        None,
            pending_remote_candidates: VecDeque::new(),
            outgoing_candidates:       Vec::new(),
            description_emitted:       false,
            connectivity_up:           false,
            local_stream: None,
            peer:         None,
            created_at:   current_timestamp(),
            connected_at: None,
        }
    }

    /// 발신 세션. callId 는 REST 응답 후 설정
    pub fn outgoing(generation: u64, local: &str, remote: &str, kind: MediaKind) -> Self {
        Self::new(generation, CallRole::Caller, None, local, remote, kind)
    }

    /// 수신 세션. callId 는 offer 의 것을 그대로 사용
    pub fn incoming(generation: u64, call_id: &str, local: &str, remote: &str, kind: MediaKind) -> Self {
        Self::new(generation, CallRole::Callee, Some(call_id.to_string()), local, remote, kind)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn set_call_id(&mut self, call_id: &str) -> CallResult<()> {
        match &self.call_id {
            None => {
                self.call_id = Some(call_id.to_string());
                Ok(())
            }
            Some(existing) if existing == call_id => Ok(()),
            Some(existing) => Err(CallError::InvalidState(format!(
                "callId already fixed to {} (got {})", existing, call_id
            ))),
        }
    }

    pub fn matches(&self, call_id: &str) -> bool {
        self.call_id.as_deref() == Some(call_id)
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// 허용된 전진이면 이전 상태 반환
    pub fn transition(&mut self, next: CallState) -> CallResult<CallState> {
        if !self.state.can_transition_to(next) {
            return Err(CallError::InvalidState(format!("{} -> {}", self.state, next)));
        }
        let prev = self.state;
        self.state = next;
        if next == CallState::Connected {
            self.connected_at = Some(current_timestamp());
        }
        Ok(prev)
    }

    /// AnswerExchanged 진입 직후 connectivity 가 이미 올라와 있으면 Connected 로 보정
    pub fn settle_connected(&mut self) -> bool {
        if self.state == CallState::AnswerExchanged && self.connectivity_up {
            return self.transition(CallState::Connected).is_ok();
        }
        false
    }

    pub fn local_tracks(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.local_stream
            .as_ref()
            .map(|s| s.tracks_of(kind).cloned().collect())
            .unwrap_or_default()
    }
}
