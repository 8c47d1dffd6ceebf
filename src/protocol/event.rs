// author: kodeholic (powered by Claude)
// 시그널링 이벤트 이름 — 브라우저 클라이언트와의 상호운용 계약이므로 문자열 그대로 유지

/// Client → Relay 전용
pub mod client {
    /// 연결 직후 인증 (user_id, token)
    pub const IDENTIFY:  &str = "identify";
    /// 클라이언트 생존 알림
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Relay → Client 전용
pub mod server {
    /// 연결 직후 heartbeat 주기 안내
    pub const HELLO:         &str = "hello";
    /// IDENTIFY 성공
    pub const READY:         &str = "ready";
    /// HEARTBEAT 수신 확인
    pub const HEARTBEAT_ACK: &str = "heartbeat-ack";
    /// 에러 응답
    pub const ERROR:         &str = "error";
}

/// 양방향: 통화 협상 이벤트 (릴레이는 targetId로 라우팅만 수행)
pub mod call {
    pub const CALL_OFFER:    &str = "call-offer";
    pub const CALL_ANSWER:   &str = "call-answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";
    pub const CALL_END:      &str = "call-end";
}
