// author: kodeholic (powered by Claude)

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// [공통] 시그널링 패킷 봉투 (Envelope)
// ----------------------------------------------------------------------------

/// 모든 WebSocket 메시지의 최상위 구조체
/// 수신/송신 공통으로 사용하며, data는 event에 따라 해석합니다.
///
/// 예시:
///   { "event": "ice-candidate", "data": { "callId": "abc123", "targetId": "bob", ... } }
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignalPacket {
    /// 이벤트 이름 (protocol::event 참조)
    pub event: String,
    /// payload. event에 따라 구조가 달라지므로 raw JSON으로 보관
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SignalPacket {
    pub fn new(event: &str, payload: impl Serialize) -> Self {
        Self {
            event: event.to_string(),
            data:  Some(serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)),
        }
    }

    pub fn no_data(event: &str) -> Self {
        Self { event: event.to_string(), data: None }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// [협상 프리미티브] SDP / ICE candidate: 브라우저 RTCSessionDescriptionInit 등과 동일 필드
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// { "type": "offer", "sdp": "v=0..." }
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp:      String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// RTCIceCandidateInit 직렬화 형태
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<&str>, sdp_m_line_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.map(str::to_string),
            sdp_m_line_index,
            username_fragment: None,
        }
    }
}

// ----------------------------------------------------------------------------
// [통화 종류]
// ----------------------------------------------------------------------------

/// 세션 수명 동안 고정되는 미디어 종류 (callType 필드)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Voice,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
        }
    }

    /// callType 문자열 변환. "audio"는 일부 클라이언트가 보내는 별칭
    pub fn from_call_type(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "voice" | "audio" => Some(MediaKind::Voice),
            "video"           => Some(MediaKind::Video),
            _                 => None,
        }
    }

    pub fn wants_video(&self) -> bool {
        *self == MediaKind::Video
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// [양방향] 통화 협상 이벤트 payload: 필드명은 상호운용 계약 (camelCase)
// ----------------------------------------------------------------------------

/// event: call-offer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallOfferPayload {
    pub call_id:   String,
    #[serde(default)]
    pub target_id: String,
    /// 릴레이가 인증된 발신자로 덮어씀
    #[serde(default)]
    pub caller_id: String,
    pub offer:     SessionDescription,
    /// "voice" | "video". 없거나 알 수 없는 값이면 SDP에서 추론
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
}

/// event: call-answer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswerPayload {
    pub call_id:     String,
    #[serde(default)]
    pub target_id:   String,
    pub answer:      SessionDescription,
    #[serde(default)]
    pub receiver_id: String,
}

/// event: ice-candidate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub call_id:   String,
    #[serde(default)]
    pub target_id: String,
    pub candidate: IceCandidate,
    #[serde(default)]
    pub sender_id: String,
}

/// event: call-end
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallEndPayload {
    pub call_id:   String,
    #[serde(default)]
    pub target_id: String,
}

// ----------------------------------------------------------------------------
// [C→S / S→C] 세션 제어 payload
// ----------------------------------------------------------------------------

/// event: identify
#[derive(Serialize, Deserialize, Debug)]
pub struct IdentifyPayload {
    pub user_id: String,
    pub token:   String,
}

/// event: hello: 연결 직후 heartbeat 주기 안내
#[derive(Serialize, Deserialize, Debug)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// event: ready: IDENTIFY 성공 응답
#[derive(Serialize, Deserialize, Debug)]
pub struct ReadyPayload {
    pub session_id: String,
    pub user_id:    String,
}

/// event: error
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub code:    u16,
    pub reason:  String,
    /// 특정 통화에 대한 에러일 때만 (예: USER_OFFLINE)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "callId")]
    pub call_id: Option<String>,
}

// ----------------------------------------------------------------------------
// [REST] POST /v1/calls
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CallSettings {
    pub video: bool,
    pub audio: bool,
}

impl CallSettings {
    pub fn for_kind(kind: MediaKind) -> Self {
        Self { video: kind.wants_video(), audio: true }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallRequest {
    pub target_user_id: String,
    pub call_type:      MediaKind,
    pub settings:       CallSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallData {
    pub call_id: String,
}

/// { success, data, message } 공통 응답 봉투
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data:    Option<T>,
    #[serde(default)]
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self { success: true, data: Some(data), message: message.into() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { success: false, data: None, message: message.into() }
    }
}
