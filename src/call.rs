// author: kodeholic (powered by Claude)
// 통화 협상 엔진 (클라이언트 측)
//
// media   : 로컬 캡처 스트림 획득/해제
// peer    : 피어 연결 백엔드 래퍼 (transceiver, candidate 큐, 원격 트랙)
// session : 통화 1건의 상태
// engine  : 세션 수명과 offer/answer 흐름 조율

pub mod engine;
pub mod media;
pub mod peer;
pub mod session;

pub use engine::{CallEngine, EngineConfig};
pub use media::{MediaAcquirer, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
pub use peer::{
    CandidateDisposition, ConnectionState, OfferOptions, PeerBackend, PeerEvent, PeerFactory, PeerSession,
    RemoteStream, SignalingState, TransceiverDirection, TransceiverInfo,
};
pub use session::{CallEvent, CallRole, CallSession, CallState};
