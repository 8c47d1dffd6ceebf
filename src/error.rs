// author: kodeholic (powered by Claude)

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    // --- 엔진 (클라이언트) ---
    /// 카메라/마이크 없음 또는 권한 거부
    Device(String),
    /// 시그널링 채널 미연결: 송신 drop, 세션 유지
    TransportUnavailable,
    /// local/remote description 상태가 기대와 다름 (best-effort 진행)
    NegotiationStateMismatch { expected: String, actual: String },
    /// ICE 연결 실패 (restart 1회 후에도 실패)
    ConnectivityFailure,
    /// callId/targetId 불일치: 이벤트 폐기
    CorrelationMismatch { expected: Option<String>, got: String },
    /// POST /v1/calls 실패 (non-2xx 또는 success=false)
    InitiationFailed(String),
    /// create/set description 등 백엔드 실패
    Negotiation(String),
    /// 진행 중이던 비동기 단계가 hangup/교체로 무효화됨
    Cancelled,
    /// 현재 상태에서 허용되지 않는 조작
    InvalidState(String),

    // --- 릴레이 (서버) ---
    NotAuthenticated,
    InvalidToken,
    InvalidPayload(String),
    UnknownEvent(String),
    UserOffline(String),
    CallNotFound(String),
    InternalError(String),
    IoError(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Device(msg)                => write!(f, "Media device error: {}", msg),
            CallError::TransportUnavailable       => write!(f, "Signaling transport not connected"),
            CallError::NegotiationStateMismatch { expected, actual } =>
                write!(f, "Negotiation state mismatch: expected {}, actual {}", expected, actual),
            CallError::ConnectivityFailure        => write!(f, "ICE connectivity failed"),
            CallError::CorrelationMismatch { expected, got } =>
                write!(f, "Call id mismatch: active={}, event={}", expected.as_deref().unwrap_or("-"), got),
            CallError::InitiationFailed(msg)      => write!(f, "Call initiation failed: {}", msg),
            CallError::Negotiation(msg)           => write!(f, "Negotiation failed: {}", msg),
            CallError::Cancelled                  => write!(f, "Call was torn down during async step"),
            CallError::InvalidState(msg)          => write!(f, "Invalid call state: {}", msg),

            CallError::NotAuthenticated           => write!(f, "Not authenticated"),
            CallError::InvalidToken               => write!(f, "Invalid token"),
            CallError::InvalidPayload(msg)        => write!(f, "Invalid payload: {}", msg),
            CallError::UnknownEvent(name)         => write!(f, "Unknown event: {}", name),
            CallError::UserOffline(uid)           => write!(f, "User offline: {}", uid),
            CallError::CallNotFound(id)           => write!(f, "Call not found: {}", id),
            CallError::InternalError(msg)         => write!(f, "Internal error: {}", msg),
            CallError::IoError(msg)               => write!(f, "Network I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CallError {}

impl From<std::io::Error> for CallError {
    fn from(err: std::io::Error) -> Self {
        CallError::IoError(err.to_string())
    }
}

impl CallError {
    /// UI에 노출해야 하는 실패인지 여부
    /// transport/correlation/state-mismatch는 로그만 남기고 조용히 복구
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::Device(_)
                | CallError::ConnectivityFailure
                | CallError::InitiationFailed(_)
                | CallError::Negotiation(_)
        )
    }
}

pub type CallResult<T> = Result<T, CallError>;
