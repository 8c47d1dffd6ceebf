// author: kodeholic (powered by Claude)

use crate::error::CallError;

/// 1xxx: 연결/인증/페이로드
pub const NOT_AUTHENTICATED:  u16 = 1000;
pub const INVALID_TOKEN:      u16 = 1001;
pub const UNKNOWN_EVENT:      u16 = 1003;
pub const INVALID_PAYLOAD:    u16 = 1004;

/// 2xxx: 라우팅
pub const USER_OFFLINE:       u16 = 2000;

/// 3xxx: 통화
pub const CALL_NOT_FOUND:     u16 = 3000;
pub const CALL_ID_MISMATCH:   u16 = 3001;
pub const CALL_STATE:         u16 = 3002;

/// 9xxx: 내부
pub const INTERNAL_ERROR:     u16 = 9000;

/// CallError → 에러 코드 변환
/// 릴레이 에러 응답 패킷 생성 시 사용
pub fn to_error_code(err: &CallError) -> u16 {
    match err {
        CallError::NotAuthenticated             => NOT_AUTHENTICATED,
        CallError::InvalidToken                 => INVALID_TOKEN,
        CallError::UnknownEvent(_)              => UNKNOWN_EVENT,
        CallError::InvalidPayload(_)            => INVALID_PAYLOAD,

        CallError::UserOffline(_)
        | CallError::TransportUnavailable       => USER_OFFLINE,

        CallError::CallNotFound(_)              => CALL_NOT_FOUND,
        CallError::CorrelationMismatch { .. }   => CALL_ID_MISMATCH,
        CallError::InvalidState(_)
        | CallError::NegotiationStateMismatch { .. }
        | CallError::Cancelled                  => CALL_STATE,

        CallError::Device(_)
        | CallError::ConnectivityFailure
        | CallError::InitiationFailed(_)
        | CallError::Negotiation(_)
        | CallError::InternalError(_)
        | CallError::IoError(_)                 => INTERNAL_ERROR,
    }
}
