// author: kodeholic (powered by Claude)
// 엔진 테스트용 가짜 capability (미디어 장치 / 피어 백엔드 / 시그널링 / REST)

#![allow(dead_code)]

use async_trait::async_trait;
use mini_webcall::call::{
    CallEngine, EngineConfig, MediaConstraints, MediaDevices, MediaStream, MediaTrack, OfferOptions,
    PeerBackend, PeerEvent, PeerFactory, SignalingState, TrackKind, TransceiverDirection, TransceiverInfo,
};
use mini_webcall::config;
use mini_webcall::error::{CallError, CallResult};
use mini_webcall::protocol::message::{
    CallAnswerPayload, CallEndPayload, CallOfferPayload, IceCandidate, IceCandidatePayload, MediaKind, SdpType,
    SessionDescription,
};
use mini_webcall::signaling::{CallInitiator, SignalMessage, SignalingTransport};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

// ----------------------------------------------------------------------------
// [SDP 픽스처]
// ----------------------------------------------------------------------------

pub fn sdp_for(kind: MediaKind) -> String {
    let mut sdp = String::from(
        "v=0\r\n\
         o=- 123 2 IN IP4 0.0.0.0\r\n\
         s=-\r\n\
         t=0 0\r\n\
         m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=mid:0\r\n\
         a=sendrecv\r\n\
         a=rtcp-mux\r\n\
         a=rtpmap:111 opus/48000/2\r\n",
    );
    if kind.wants_video() {
        sdp.push_str(
            "m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:1\r\n\
             a=sendrecv\r\n\
             a=rtcp-mux\r\n\
             a=rtpmap:96 VP8/90000\r\n",
        );
    }
    sdp
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 udp 2113937151 10.0.0.{} 5000 typ host", n, n),
        Some("0"),
        Some(0),
    )
}

pub fn offer_payload(call_id: &str, from: &str, to: &str, kind: MediaKind) -> CallOfferPayload {
    CallOfferPayload {
        call_id:   call_id.to_string(),
        target_id: to.to_string(),
        caller_id: from.to_string(),
        offer:     SessionDescription::offer(sdp_for(kind)),
        call_type: Some(kind.as_str().to_string()),
    }
}

pub fn answer_payload(call_id: &str, from: &str, to: &str, kind: MediaKind) -> CallAnswerPayload {
    CallAnswerPayload {
        call_id:     call_id.to_string(),
        target_id:   to.to_string(),
        answer:      SessionDescription::answer(sdp_for(kind)),
        receiver_id: from.to_string(),
    }
}

pub fn candidate_payload(call_id: &str, from: &str, to: &str, n: u16) -> IceCandidatePayload {
    IceCandidatePayload {
        call_id:   call_id.to_string(),
        target_id: to.to_string(),
        candidate: candidate(n),
        sender_id: from.to_string(),
    }
}

pub fn end_payload(call_id: &str, to: &str) -> CallEndPayload {
    CallEndPayload { call_id: call_id.to_string(), target_id: to.to_string() }
}

/// 비동기 태스크(이벤트 펌프 등) 반영 대기
pub async fn eventually(label: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met: {}", label);
}

// ----------------------------------------------------------------------------
// [FakeDevices] getUserMedia
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDevices {
    deny:     AtomicBool,
    gate:     Mutex<Option<Arc<Notify>>>,
    requests: AtomicUsize,
    issued:   Mutex<Vec<MediaStream>>,
    /// 같은 종류 트랙을 두 개씩 돌려줌
    pub duplicate_tracks: AtomicBool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// 이후 요청은 반환된 Notify 가 깨울 때까지 대기
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> CallResult<MediaStream> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::Device("permission denied".to_string()));
        }

        let copies = if self.duplicate_tracks.load(Ordering::SeqCst) { 2 } else { 1 };
        let mut tracks = Vec::new();
        for i in 0..copies {
            tracks.push(MediaTrack::new(format!("mic-{}-{}", n, i), TrackKind::Audio));
            if constraints.video {
                tracks.push(MediaTrack::new(format!("cam-{}-{}", n, i), TrackKind::Video));
            }
        }
        let stream = MediaStream::new(format!("local-{}", n), tracks);
        self.issued.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

// ----------------------------------------------------------------------------
// [FakeBackend] RTCPeerConnection
// ----------------------------------------------------------------------------

pub struct FakeBackend {
    pub kind:          MediaKind,
    transceivers:      Mutex<Vec<TransceiverInfo>>,
    pub tracks:        Mutex<Vec<MediaTrack>>,
    pub local:         Mutex<Option<SessionDescription>>,
    pub remote:        Mutex<Option<SessionDescription>>,
    pub remote_sets:   AtomicUsize,
    pub candidates:    Mutex<Vec<IceCandidate>>,
    pub offer_options: Mutex<Option<OfferOptions>>,
    pub restarts:      AtomicU32,
    pub closed:        AtomicBool,
    pub receivers:     Mutex<Vec<MediaTrack>>,
    /// set_local_description 시 로컬 candidate 1개 수집
    pub gather_on_local: AtomicBool,
    events:            mpsc::Sender<PeerEvent>,
}

impl FakeBackend {
    /// 백엔드 → 엔진 이벤트 주입
    pub async fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn transceiver_kinds(&self) -> Vec<TrackKind> {
        self.transceivers.lock().unwrap().iter().map(|t| t.kind).collect()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerBackend for FakeBackend {
    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.transceivers.lock().unwrap().clone()
    }

    async fn add_transceiver(&self, kind: TrackKind, direction: TransceiverDirection) -> CallResult<()> {
        self.transceivers.lock().unwrap().push(TransceiverInfo { kind, direction });
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> CallResult<()> {
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn create_offer(&self, options: &OfferOptions) -> CallResult<SessionDescription> {
        *self.offer_options.lock().unwrap() = Some(*options);
        Ok(SessionDescription::offer(sdp_for(self.kind)))
    }

    async fn create_answer(&self, options: &OfferOptions) -> CallResult<SessionDescription> {
        *self.offer_options.lock().unwrap() = Some(*options);
        Ok(SessionDescription::answer(sdp_for(self.kind)))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> CallResult<()> {
        *self.local.lock().unwrap() = Some(desc.clone());
        if self.gather_on_local.load(Ordering::SeqCst) {
            let _ = self.events.try_send(PeerEvent::LocalCandidate(candidate(99)));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> CallResult<()> {
        *self.remote.lock().unwrap() = Some(desc.clone());
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()> {
        if self.remote.lock().unwrap().is_none() {
            return Err(CallError::Negotiation("no remote description".to_string()));
        }
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        if self.closed.load(Ordering::SeqCst) {
            return SignalingState::Closed;
        }
        let local  = self.local.lock().unwrap().as_ref().map(|d| d.sdp_type);
        let remote = self.remote.lock().unwrap().as_ref().map(|d| d.sdp_type);
        match (local, remote) {
            (Some(SdpType::Offer), None) => SignalingState::HaveLocalOffer,
            (None, Some(SdpType::Offer)) => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        }
    }

    async fn restart_ice(&self) -> CallResult<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn receiver_tracks(&self) -> Vec<MediaTrack> {
        self.receivers.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    backends: Mutex<Vec<Arc<FakeBackend>>>,
    pub gather_on_local: AtomicBool,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.backends.lock().unwrap().len()
    }

    pub fn backend(&self, index: usize) -> Arc<FakeBackend> {
        Arc::clone(&self.backends.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<FakeBackend> {
        let backends = self.backends.lock().unwrap();
        Arc::clone(backends.last().expect("no peer backend created"))
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self, kind: MediaKind) -> CallResult<(Arc<dyn PeerBackend>, mpsc::Receiver<PeerEvent>)> {
        let (tx, rx) = mpsc::channel(config::PEER_EVENT_QUEUE_SIZE);
        let backend = Arc::new(FakeBackend {
            kind,
            transceivers:    Mutex::new(Vec::new()),
            tracks:          Mutex::new(Vec::new()),
            local:           Mutex::new(None),
            remote:          Mutex::new(None),
            remote_sets:     AtomicUsize::new(0),
            candidates:      Mutex::new(Vec::new()),
            offer_options:   Mutex::new(None),
            restarts:        AtomicU32::new(0),
            closed:          AtomicBool::new(false),
            receivers:       Mutex::new(Vec::new()),
            gather_on_local: AtomicBool::new(self.gather_on_local.load(Ordering::SeqCst)),
            events:          tx,
        });
        self.backends.lock().unwrap().push(Arc::clone(&backend));
        Ok((backend, rx))
    }
}

// ----------------------------------------------------------------------------
// [FakeTransport] 시그널링 채널
// ----------------------------------------------------------------------------

pub struct FakeTransport {
    connected: AtomicBool,
    sent:      Mutex<Vec<SignalMessage>>,
    inbound:   broadcast::Sender<SignalMessage>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (inbound, _) = broadcast::channel(64);
        Arc::new(Self { connected: AtomicBool::new(true), sent: Mutex::new(Vec::new()), inbound })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(SignalMessage::event_name).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent_events().iter().filter(|e| **e == event).count()
    }

    /// 릴레이 → 엔진 수신 흉내
    pub fn inject(&self, message: SignalMessage) {
        let _ = self.inbound.send(message);
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: SignalMessage) -> CallResult<()> {
        if !self.is_connected() {
            return Err(CallError::TransportUnavailable);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.inbound.subscribe()
    }
}

// ----------------------------------------------------------------------------
// [FakeInitiator] POST /v1/calls
// ----------------------------------------------------------------------------

pub struct FakeInitiator {
    next:     Mutex<CallResult<String>>,
    pub calls: AtomicUsize,
}

impl FakeInitiator {
    pub fn issuing(call_id: &str) -> Arc<Self> {
        Arc::new(Self { next: Mutex::new(Ok(call_id.to_string())), calls: AtomicUsize::new(0) })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            next:  Mutex::new(Err(CallError::InitiationFailed(reason.to_string()))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_next(&self, call_id: &str) {
        *self.next.lock().unwrap() = Ok(call_id.to_string());
    }
}

#[async_trait]
impl CallInitiator for FakeInitiator {
    async fn initiate(&self, _target: &str, _kind: MediaKind) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().unwrap().clone()
    }
}

// ----------------------------------------------------------------------------
// [Harness]
// ----------------------------------------------------------------------------

pub struct Harness {
    pub engine:    CallEngine,
    pub transport: Arc<FakeTransport>,
    pub devices:   Arc<FakeDevices>,
    pub peers:     Arc<FakePeerFactory>,
    pub initiator: Arc<FakeInitiator>,
}

pub fn harness(user_id: &str, initiator: Arc<FakeInitiator>) -> Harness {
    let transport = FakeTransport::new();
    let devices   = FakeDevices::new();
    let peers     = FakePeerFactory::new();

    let mut config = EngineConfig::new(user_id);
    config.remote_stream_timeout = Duration::from_millis(200);

    let engine = CallEngine::new(
        config,
        Arc::clone(&transport) as Arc<dyn SignalingTransport>,
        Arc::clone(&initiator) as Arc<dyn CallInitiator>,
        Arc::clone(&devices) as Arc<dyn MediaDevices>,
        Arc::clone(&peers) as Arc<dyn PeerFactory>,
    );
    Harness { engine, transport, devices, peers, initiator }
}
