// author: kodeholic (powered by Claude)
// 매직 넘버를 배제하고 엔진/릴레이 전체의 타이밍과 한계를 제어하는 상수 모음입니다.

// ----------------------------------------------------------------------------
// 통화 협상 엔진 (클라이언트)
// ----------------------------------------------------------------------------

/// 원격 composite stream 대기 상한: 기대 트랙 수가 채워지면 즉시 반환 (5초)
pub const REMOTE_STREAM_TIMEOUT_MS: u64 = 5_000;

/// connectivity=failed 시 허용되는 ICE restart 횟수
pub const MAX_ICE_RESTARTS: u32 = 1;

/// 엔진 → UI 이벤트 브로드캐스트 버퍼
pub const ENGINE_EVENT_BUF: usize = 64;

/// 피어 백엔드 이벤트(candidate/track/state) 큐 사이즈
pub const PEER_EVENT_QUEUE_SIZE: usize = 256;

/// 시그널링 수신 브로드캐스트 버퍼: 초과 시 lagged
pub const SIGNAL_BUF: usize = 256;

/// READY 응답 대기 시간 (5초)
pub const IDENTIFY_TIMEOUT_MS: u64 = 5_000;

// ----------------------------------------------------------------------------
// 시그널링 릴레이 (서버)
// ----------------------------------------------------------------------------

/// WS/HTTP 공용 TCP 포트
pub const SIGNALING_PORT: u16 = 8080;

/// 연결당 송신(Egress) 큐 사이즈
pub const EGRESS_QUEUE_SIZE: usize = 2048;

/// 클라이언트가 heartbeat를 보내야 하는 주기 (30초)
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// heartbeat 없는 세션 정리 타임아웃 (90초)
pub const ZOMBIE_TIMEOUT_MS: u64 = 90_000;

/// reaper 실행 주기 (10초)
pub const REAPER_INTERVAL_MS: u64 = 10_000;

/// 응답 없는 발신: 이 시간 지나면 missed 처리 (45초)
pub const RING_TIMEOUT_MS: u64 = 45_000;

/// 통화 이력 최대 보관 건수: 초과 시 종료된 오래된 이력부터 제거
pub const MAX_CALL_HISTORY: usize = 1_000;

/// IDENTIFY / REST bearer 토큰 검증용 Secret Key
/// 운영 환경에서는 환경변수 WEBCALL_SECRET 으로 오버라이드 할 것
pub const DEFAULT_SECRET_KEY: &str = "changeme-secret";

/// callId 랜덤 부분 길이
pub const CALL_ID_LEN: usize = 20;

/// 환경변수 우선, 없으면 기본 secret
pub fn secret_key() -> String {
    std::env::var("WEBCALL_SECRET").unwrap_or_else(|_| DEFAULT_SECRET_KEY.to_string())
}
