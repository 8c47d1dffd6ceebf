// author: kodeholic (powered by Claude)
// Peer Session — 피어 연결 백엔드 래퍼
//
// 실제 RTCPeerConnection(브라우저 / webrtc-rs 등)은 PeerBackend 뒤에 숨긴다.
// PeerSession 이 보장하는 것:
//   - transceiver 는 세션당 1회만 할당 (재진입 시 중복 생성 없음)
//   - remote description 적용 전 도착한 candidate 는 큐잉 → 적용 직후 도착 순서대로 flush
//   - 원격 트랙 dedup: audio/video 각각 첫 트랙만 채택
//   - ICE restart 는 세션당 MAX_ICE_RESTARTS 회

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::call::media::{MediaStream, MediaTrack, TrackKind};
use crate::config;
use crate::error::{CallError, CallResult};
use crate::protocol::message::{IceCandidate, MediaKind, SdpType, SessionDescription};
use crate::protocol::sdp;

// ----------------------------------------------------------------------------
// [백엔드 계약 타입]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInfo {
    pub kind:      TrackKind,
    pub direction: TransceiverDirection,
}

/// createOffer/createAnswer 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    pub offer_to_receive_audio:   bool,
    pub offer_to_receive_video:   bool,
    pub voice_activity_detection: bool,
}

impl OfferOptions {
    pub fn for_kind(kind: MediaKind) -> Self {
        Self {
            offer_to_receive_audio:   true,
            offer_to_receive_video:   kind.wants_video(),
            voice_activity_detection: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalingState::Stable             => "stable",
            SignalingState::HaveLocalOffer     => "have-local-offer",
            SignalingState::HaveRemoteOffer    => "have-remote-offer",
            SignalingState::HaveLocalPranswer  => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed             => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// 백엔드 → 엔진 비동기 이벤트
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// 로컬 ICE candidate 수집됨 → 상대에게 전송
    LocalCandidate(IceCandidate),
    /// 원격 트랙 도착 (ontrack)
    RemoteTrack(MediaTrack),
    /// ICE 연결 상태 변경
    ConnectionState(ConnectionState),
}

/// RTCPeerConnection capability
#[async_trait]
pub trait PeerBackend: Send + Sync {
    fn transceivers(&self) -> Vec<TransceiverInfo>;
    async fn add_transceiver(&self, kind: TrackKind, direction: TransceiverDirection) -> CallResult<()>;
    async fn add_track(&self, track: &MediaTrack) -> CallResult<()>;
    async fn create_offer(&self, options: &OfferOptions) -> CallResult<SessionDescription>;
    async fn create_answer(&self, options: &OfferOptions) -> CallResult<SessionDescription>;
    async fn set_local_description(&self, desc: &SessionDescription) -> CallResult<()>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> CallResult<()>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()>;
    fn signaling_state(&self) -> SignalingState;
    async fn restart_ice(&self) -> CallResult<()>;
    /// 현재 receiver 에 붙은 원격 트랙 (ontrack 누락 시 폴백용)
    fn receiver_tracks(&self) -> Vec<MediaTrack>;
    async fn close(&self);
}

/// 세션마다 새 백엔드 생성. 이벤트 수신단은 엔진이 소유
/// 이벤트 채널은 config::PEER_EVENT_QUEUE_SIZE 로 잡는다
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, kind: MediaKind) -> CallResult<(Arc<dyn PeerBackend>, mpsc::Receiver<PeerEvent>)>;
}

// ----------------------------------------------------------------------------
// [RemoteStream] 원격 composite stream
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

impl RemoteStream {
    /// audio 먼저, video 다음
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    pub fn track_count(&self) -> usize {
        self.audio.is_some() as usize + self.video.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.track_count() == 0
    }

    /// 통화 종류가 요구하는 트랙이 모두 있는지 (audio, video 통화면 video 까지)
    pub fn covers(&self, kind: MediaKind) -> bool {
        self.audio.is_some() && (!kind.wants_video() || self.video.is_some())
    }
}

/// add_remote_candidate 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Queued,
    Discarded,
}

/// connectivity=failed 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Restarting,
    GiveUp,
}

// ----------------------------------------------------------------------------
// [PeerSession]
// ----------------------------------------------------------------------------

struct PeerState {
    remote_description_set: bool,
    flushing:               bool,
    pending_candidates:     VecDeque<IceCandidate>,
    local_tracks_attached:  bool,
    remote:                 RemoteStream,
    ice_restarts:           u32,
    closed:                 bool,
}

pub struct PeerSession {
    backend:    Arc<dyn PeerBackend>,
    media_kind: MediaKind,
    state:      Mutex<PeerState>,
    remote_tx:  watch::Sender<RemoteStream>,
}

impl PeerSession {
    /// 백엔드 위에 세션을 열고 transceiver 확보
    pub async fn open(backend: Arc<dyn PeerBackend>, media_kind: MediaKind) -> CallResult<Self> {
        let (remote_tx, _) = watch::channel(RemoteStream::default());
        let session = Self {
            backend,
            media_kind,
            state: Mutex::new(PeerState {
                remote_description_set: false,
                flushing:               false,
                pending_candidates:     VecDeque::new(),
                local_tracks_attached:  false,
                remote:                 RemoteStream::default(),
                ice_restarts:           0,
                closed:                 false,
            }),
            remote_tx,
        };
        if let Err(e) = session.ensure_transceivers().await {
            session.backend.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// audio(항상) + video(video 통화만) sendrecv. 이미 있으면 건너뜀
    pub async fn ensure_transceivers(&self) -> CallResult<()> {
        let existing = self.backend.transceivers();
        let mut wanted = vec![TrackKind::Audio];
        if self.media_kind.wants_video() {
            wanted.push(TrackKind::Video);
        }

        for kind in wanted {
            if existing.iter().any(|t| t.kind == kind) {
                trace!("[peer] {} transceiver already allocated", kind);
                continue;
            }
            self.backend.add_transceiver(kind, TransceiverDirection::SendRecv).await?;
            debug!("[peer] {} transceiver added (sendrecv)", kind);
        }
        Ok(())
    }

    /// 로컬 트랙 부착. 종류별 1개, voice 통화면 video 트랙 무시
    pub async fn attach_local_tracks(&self, stream: &MediaStream) -> CallResult<usize> {
        let mut attached = 0;
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if kind == TrackKind::Video && !self.media_kind.wants_video() {
                continue;
            }
            if let Some(track) = stream.first(kind) {
                self.backend.add_track(track).await?;
                attached += 1;
            }
        }
        self.state.lock().unwrap().local_tracks_attached = true;
        debug!("[peer] attached {} local track(s) from stream={}", attached, stream.id);
        Ok(attached)
    }

    pub async fn create_offer(&self) -> CallResult<SessionDescription> {
        self.backend.create_offer(&OfferOptions::for_kind(self.media_kind)).await
    }

    pub async fn create_answer(&self) -> CallResult<SessionDescription> {
        let answer = self.backend.create_answer(&OfferOptions::for_kind(self.media_kind)).await?;
        if answer.sdp_type != SdpType::Answer {
            return Err(CallError::Negotiation(format!("backend produced {:?} for answer", answer.sdp_type)));
        }
        Ok(answer)
    }

    pub async fn set_local_description(&self, desc: &SessionDescription) -> CallResult<()> {
        self.backend.set_local_description(desc).await
    }

    /// remote description 적용 후 대기 candidate 를 도착 순서대로 flush
    ///
    /// signaling state 가 기대와 달라도 경고 후 진행한다 (백엔드가 최종 판정).
    pub async fn set_remote_description(&self, desc: &SessionDescription) -> CallResult<()> {
        {
            let st = self.state.lock().unwrap();
            if st.closed {
                return Err(CallError::Cancelled);
            }
            if desc.sdp_type == SdpType::Offer && !st.local_tracks_attached {
                warn!("[peer] remote offer applied before local tracks attached");
            }
        }

        let expected = match desc.sdp_type {
            SdpType::Answer => Some(SignalingState::HaveLocalOffer),
            SdpType::Offer  => Some(SignalingState::Stable),
            _               => None,
        };
        let actual = self.backend.signaling_state();
        if let Some(expected) = expected {
            if expected != actual {
                let mismatch = CallError::NegotiationStateMismatch {
                    expected: expected.to_string(),
                    actual:   actual.to_string(),
                };
                warn!("[peer] {}, proceeding", mismatch);
            }
        }

        if desc.sdp_type == SdpType::Answer {
            match sdp::inspect(&desc.sdp) {
                Ok(summary) if !summary.has_audio() => warn!("[peer] remote answer has no active audio section"),
                Ok(summary) if self.media_kind.wants_video() && !summary.has_video() =>
                    info!("[peer] remote answered video call without video"),
                Ok(_) => {}
                Err(e) => debug!("[peer] answer sdp not inspectable: {}", e),
            }
        }

        self.backend.set_remote_description(desc).await?;

        {
            let mut st = self.state.lock().unwrap();
            st.remote_description_set = true;
            st.flushing = true;
        }
        self.flush_pending().await;
        Ok(())
    }

    async fn flush_pending(&self) {
        let mut flushed = 0usize;
        loop {
            let next = {
                let mut st = self.state.lock().unwrap();
                if st.closed {
                    st.pending_candidates.clear();
                    st.flushing = false;
                    break;
                }
                match st.pending_candidates.pop_front() {
                    Some(c) => c,
                    None => {
                        st.flushing = false;
                        break;
                    }
                }
            };
            self.apply_candidate(&next).await;
            flushed += 1;
        }
        if flushed > 0 {
            debug!("[peer] flushed {} queued remote candidate(s)", flushed);
        }
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) -> CandidateDisposition {
        match self.backend.add_ice_candidate(candidate).await {
            Ok(()) => CandidateDisposition::Applied,
            Err(e) => {
                warn!("[peer] addIceCandidate failed (ignored): {}", e);
                CandidateDisposition::Discarded
            }
        }
    }

    /// 원격 candidate 적용 또는 큐잉. 실패는 로그만 남기고 무시
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> CandidateDisposition {
        {
            let mut st = self.state.lock().unwrap();
            if st.closed {
                debug!("[peer] candidate after close discarded");
                return CandidateDisposition::Discarded;
            }
            if !st.remote_description_set || st.flushing {
                st.pending_candidates.push_back(candidate);
                trace!("[peer] candidate queued (pending={})", st.pending_candidates.len());
                return CandidateDisposition::Queued;
            }
        }
        self.apply_candidate(&candidate).await
    }

    /// 세션 버퍼에 쌓여 있던 candidate 를 그대로 이관 (remote 미적용 상태 전제)
    pub fn queue_candidates(&self, candidates: impl IntoIterator<Item = IceCandidate>) {
        let mut st = self.state.lock().unwrap();
        st.pending_candidates.extend(candidates);
    }

    pub fn pending_candidates(&self) -> usize {
        self.state.lock().unwrap().pending_candidates.len()
    }

    /// ontrack 처리. 새로 채택되면 갱신된 스트림 반환, 중복이면 None
    /// voice 통화에 붙은 video 트랙은 채택하지 않는다
    pub fn on_remote_track(&self, track: MediaTrack) -> Option<RemoteStream> {
        if track.kind() == TrackKind::Video && !self.media_kind.wants_video() {
            debug!("[peer] remote video track on voice call ignored id={}", track.id());
            return None;
        }
        let snapshot = {
            let mut st = self.state.lock().unwrap();
            if st.closed {
                return None;
            }
            let slot = match track.kind() {
                TrackKind::Audio => &mut st.remote.audio,
                TrackKind::Video => &mut st.remote.video,
            };
            if slot.is_some() {
                debug!("[peer] duplicate remote {} track ignored id={}", track.kind(), track.id());
                return None;
            }
            debug!("[peer] remote {} track adopted id={}", track.kind(), track.id());
            *slot = Some(track);
            st.remote.clone()
        };
        self.remote_tx.send_replace(snapshot.clone());
        Some(snapshot)
    }

    pub fn remote_stream(&self) -> RemoteStream {
        self.state.lock().unwrap().remote.clone()
    }

    /// 통화 종류별 기대 트랙이 모이거나 timeout 까지 대기
    /// timeout 시 receiver 에서 직접 수집해서 있는 만큼 반환
    pub async fn wait_remote_stream(&self, timeout: Duration) -> RemoteStream {
        let kind = self.media_kind;
        let mut rx = self.remote_tx.subscribe();

        let filled = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|r| r.covers(kind))).await,
            Ok(Ok(_))
        );
        if filled {
            return self.remote_stream();
        }

        debug!("[peer] remote stream incomplete after {:?}, polling receivers", timeout);
        for track in self.backend.receiver_tracks() {
            self.on_remote_track(track);
        }
        self.remote_stream()
    }

    /// connectivity=failed: 한도 내면 ICE restart, 아니면 GiveUp
    pub async fn handle_connectivity_failure(&self) -> FailureAction {
        let attempt = {
            let mut st = self.state.lock().unwrap();
            if st.closed || st.ice_restarts >= config::MAX_ICE_RESTARTS {
                return FailureAction::GiveUp;
            }
            st.ice_restarts += 1;
            st.ice_restarts
        };

        info!("[peer] ICE failed, restarting (attempt {}/{})", attempt, config::MAX_ICE_RESTARTS);
        match self.backend.restart_ice().await {
            Ok(()) => FailureAction::Restarting,
            Err(e) => {
                warn!("[peer] ICE restart failed: {}", e);
                FailureAction::GiveUp
            }
        }
    }

    pub fn ice_restarts(&self) -> u32 {
        self.state.lock().unwrap().ice_restarts
    }

    /// 멱등. 대기 candidate 폐기 후 백엔드 close
    pub async fn close(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.closed {
                return;
            }
            st.closed = true;
            st.pending_candidates.clear();
        }
        self.backend.close().await;
        debug!("[peer] session closed");
    }
}
