// author: kodeholic (powered by Claude)
// Call Engine — 1:1 통화 협상 오케스트레이터
//
// 세션은 동시에 하나. 모든 변경은 slot 뮤텍스 안에서 동기적으로 일어나고,
// 비동기 단계(REST, getUserMedia, SDP 생성/적용) 이후에는 항상 세대(generation) 재확인.
//   - 세대가 바뀌었으면 hangup/교체가 끼어든 것 → 결과물 정리 후 Cancelled
//   - 세대 번호는 세션 설치/종료 시마다 증가
//
// 수신 이벤트는 callId 로 활성 세션과 대조. 불일치는 로그 후 폐기.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::call::media::{MediaAcquirer, MediaDevices, MediaStream, TrackKind};
use crate::call::peer::{
    CandidateDisposition, ConnectionState, FailureAction, PeerEvent, PeerFactory, PeerSession, RemoteStream,
};
use crate::call::session::{CallEvent, CallRole, CallSession, CallState};
use crate::config;
use crate::error::{CallError, CallResult};
use crate::protocol::error_code;
use crate::protocol::message::{
    CallAnswerPayload, CallEndPayload, CallOfferPayload, ErrorPayload, IceCandidate, IceCandidatePayload, MediaKind,
    SessionDescription,
};
use crate::protocol::sdp;
use crate::signaling::{CallInitiator, SignalMessage, SignalingTransport};
use crate::utils::current_timestamp;

// ----------------------------------------------------------------------------
// [설정]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub local_user_id:         String,
    pub remote_stream_timeout: Duration,
}

impl EngineConfig {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id:         local_user_id.into(),
            remote_stream_timeout: Duration::from_millis(config::REMOTE_STREAM_TIMEOUT_MS),
        }
    }
}

// ----------------------------------------------------------------------------
// [CallEngine]
// ----------------------------------------------------------------------------

struct Slot {
    /// 세션이 없을 때의 상태 (Idle 또는 마지막 종료 상태)
    state:      CallState,
    generation: u64,
    session:    Option<CallSession>,
}

struct EngineInner {
    config:    EngineConfig,
    transport: Arc<dyn SignalingTransport>,
    initiator: Arc<dyn CallInitiator>,
    peers:     Arc<dyn PeerFactory>,
    media:     MediaAcquirer,
    slot:      Mutex<Slot>,
    events:    broadcast::Sender<CallEvent>,
}

#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

impl CallEngine {
    pub fn new(
        config:    EngineConfig,
        transport: Arc<dyn SignalingTransport>,
        initiator: Arc<dyn CallInitiator>,
        devices:   Arc<dyn MediaDevices>,
        peers:     Arc<dyn PeerFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(config::ENGINE_EVENT_BUF);
        Self {
            inner: Arc::new(EngineInner {
                config,
                transport,
                initiator,
                peers,
                media: MediaAcquirer::new(devices),
                slot:  Mutex::new(Slot { state: CallState::Idle, generation: 0, session: None }),
                events,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // 조회
    // ------------------------------------------------------------------------

    pub fn local_user_id(&self) -> &str {
        &self.inner.config.local_user_id
    }

    pub fn state(&self) -> CallState {
        let slot = self.inner.slot.lock().unwrap();
        slot.session.as_ref().map(CallSession::state).unwrap_or(slot.state)
    }

    pub fn call_id(&self) -> Option<String> {
        self.read_session(|s| s.call_id().map(str::to_string)).flatten()
    }

    pub fn role(&self) -> Option<CallRole> {
        self.read_session(|s| s.role)
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.read_session(|s| s.media_kind)
    }

    pub fn remote_user_id(&self) -> Option<String> {
        self.read_session(|s| s.remote_user_id.clone())
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.read_session(|s| s.local_stream.clone()).flatten()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.read_session(|s| s.peer.as_ref().map(|p| p.remote_stream())).flatten()
    }

    /// 기대 원격 트랙(voice audio, video audio+video)이 모일 때까지 대기. 세션 없으면 None
    pub async fn wait_remote_stream(&self) -> Option<RemoteStream> {
        let peer = self.read_session(|s| s.peer.clone()).flatten()?;
        Some(peer.wait_remote_stream(self.inner.config.remote_stream_timeout).await)
    }

    /// 현재 세션에서 시도한 ICE restart 횟수. 피어 없으면 0
    pub fn ice_restarts(&self) -> u32 {
        self.read_session(|s| s.peer.as_ref().map(|p| p.ice_restarts()))
            .flatten()
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // 발신
    // ------------------------------------------------------------------------

    /// REST 로 callId 발급 → 미디어 획득 → offer 생성/송신. 성공 시 callId
    ///
    /// 시그널링 미연결이면 Err(TransportUnavailable) 이지만 세션은 Initiating 으로 남는다.
    /// 재연결 후 resend_offer() 로 이어서 진행.
    pub async fn initiate_call(&self, remote_user_id: &str, kind: MediaKind) -> CallResult<String> {
        if remote_user_id.is_empty() {
            return Err(CallError::InvalidState("target user id is empty".to_string()));
        }

        let local = self.inner.config.local_user_id.clone();
        let (gen, old) = self.install(
            |_| Ok(()),
            |g| CallSession::outgoing(g, &local, remote_user_id, kind),
        )?;
        if let Some(old) = old {
            info!("[engine] replacing active session call_id={}", old.call_id().unwrap_or("-"));
            self.teardown(old, true).await;
        }

        info!("[engine] outgoing {} call to {}", kind, remote_user_id);
        self.publish_state(None, CallState::Initiating);

        let result = self.run_outgoing(gen, remote_user_id, kind).await;
        self.settle(gen, result).await
    }

    async fn run_outgoing(&self, gen: u64, remote_user_id: &str, kind: MediaKind) -> CallResult<String> {
        let call_id = self.inner.initiator.initiate(remote_user_id, kind).await?;
        self.with_session(gen, |s| s.set_call_id(&call_id))??;
        debug!("[engine] call_id={} issued for {}", call_id, remote_user_id);

        let stream = self.attach_local_media(gen, kind).await?;

        let peer = self.open_peer(gen, kind).await?;
        peer.attach_local_tracks(&stream).await?;
        self.ensure_live(gen)?;

        let offer = peer.create_offer().await?;
        self.ensure_live(gen)?;
        peer.set_local_description(&offer).await?;
        self.with_session(gen, |s| s.local_description = Some(offer))?;

        self.emit_offer(gen).await?;
        Ok(call_id)
    }

    async fn emit_offer(&self, gen: u64) -> CallResult<()> {
        let payload = self.with_session(gen, |s| -> CallResult<CallOfferPayload> {
            let call_id = s.call_id().ok_or_else(|| CallError::InvalidState("no callId".to_string()))?;
            let offer = s.local_description.clone()
                .ok_or_else(|| CallError::InvalidState("no local offer".to_string()))?;
            Ok(CallOfferPayload {
                call_id:   call_id.to_string(),
                target_id: s.remote_user_id.clone(),
                caller_id: s.local_user_id.clone(),
                offer,
                call_type: Some(s.media_kind.as_str().to_string()),
            })
        })??;

        let call_id = payload.call_id.clone();
        self.inner.transport.send(SignalMessage::CallOffer(payload)).await?;

        let (advanced, queued) = self.with_session(gen, |s| {
            s.description_emitted = true;
            let advanced = s.state() == CallState::Initiating && s.transition(CallState::OfferSent).is_ok();
            (advanced, std::mem::take(&mut s.outgoing_candidates))
        })?;
        if advanced {
            self.publish_state(Some(call_id.clone()), CallState::OfferSent);
        }
        self.send_candidates(gen, queued).await;
        Ok(())
    }

    /// Initiating 에 머문 발신 세션의 offer 재전송
    pub async fn resend_offer(&self) -> CallResult<()> {
        let gen = {
            let slot = self.inner.slot.lock().unwrap();
            let s = slot.session.as_ref()
                .ok_or_else(|| CallError::InvalidState("no active call".to_string()))?;
            if s.role != CallRole::Caller || s.state() != CallState::Initiating || s.local_description.is_none() {
                return Err(CallError::InvalidState(format!("resend offer in {}", s.state())));
            }
            s.generation
        };
        let result = self.emit_offer(gen).await;
        self.settle(gen, result).await
    }

    // ------------------------------------------------------------------------
    // 수신
    // ------------------------------------------------------------------------

    /// call-offer 처리: 세션 설치 → 미디어 획득 → answer 준비 (송신은 accept_call)
    pub async fn on_remote_offer(&self, offer: CallOfferPayload) -> CallResult<()> {
        let (gen, kind, old) = self.begin_incoming(&offer)?;
        self.prepare_answer(gen, kind, old, offer).await
    }

    /// 동기 구간: 검증 + 세션 설치. 이후 도착하는 candidate 는 새 세션에 버퍼링된다
    fn begin_incoming(&self, offer: &CallOfferPayload) -> CallResult<(u64, MediaKind, Option<CallSession>)> {
        let local = self.inner.config.local_user_id.clone();
        if offer.call_id.is_empty() || offer.caller_id.is_empty() {
            return Err(CallError::InvalidPayload("call-offer without callId/callerId".to_string()));
        }
        if !offer.target_id.is_empty() && offer.target_id != local {
            return Err(CallError::CorrelationMismatch { expected: Some(local), got: offer.target_id.clone() });
        }

        let kind = sdp::resolve_media_kind(offer.call_type.as_deref(), &offer.offer.sdp);
        let (gen, old) = self.install(
            |current| match current {
                Some(s) if s.matches(&offer.call_id) =>
                    Err(CallError::InvalidState(format!("duplicate offer for {}", offer.call_id))),
                _ => Ok(()),
            },
            |g| CallSession::incoming(g, &offer.call_id, &local, &offer.caller_id, kind),
        )?;
        Ok((gen, kind, old))
    }

    async fn prepare_answer(
        &self,
        gen:   u64,
        kind:  MediaKind,
        old:   Option<CallSession>,
        offer: CallOfferPayload,
    ) -> CallResult<()> {
        if let Some(old) = old {
            info!("[engine] incoming offer replaces call_id={}", old.call_id().unwrap_or("-"));
            self.teardown(old, true).await;
        }

        info!("[engine] incoming {} call call_id={} from {}", kind, offer.call_id, offer.caller_id);
        self.publish_state(Some(offer.call_id.clone()), CallState::Initiating);

        let result = self.run_incoming(gen, kind, offer).await;
        self.settle(gen, result).await
    }

    async fn run_incoming(&self, gen: u64, kind: MediaKind, offer: CallOfferPayload) -> CallResult<()> {
        let stream = self.attach_local_media(gen, kind).await?;

        let peer = self.open_peer(gen, kind).await?;
        // 원격 offer 적용 전에 로컬 트랙 부착 (answer 에 송신 트랙 포함)
        peer.attach_local_tracks(&stream).await?;
        self.ensure_live(gen)?;

        peer.set_remote_description(&offer.offer).await?;
        self.with_session(gen, |s| s.remote_description = Some(offer.offer.clone()))?;

        let answer = peer.create_answer().await?;
        self.ensure_live(gen)?;
        peer.set_local_description(&answer).await?;

        self.with_session(gen, |s| {
            s.local_description = Some(answer);
            s.transition(CallState::OfferReceived)
        })??;

        self.publish_state(Some(offer.call_id.clone()), CallState::OfferReceived);
        self.publish(CallEvent::IncomingCall {
            call_id:    offer.call_id,
            caller_id:  offer.caller_id,
            media_kind: kind,
        });
        Ok(())
    }

    /// 사용자 수락: 준비된 answer 송신
    pub async fn accept_call(&self) -> CallResult<()> {
        let (gen, payload) = {
            let slot = self.inner.slot.lock().unwrap();
            let s = slot.session.as_ref()
                .ok_or_else(|| CallError::InvalidState("no incoming call".to_string()))?;
            if s.role != CallRole::Callee || s.state() != CallState::OfferReceived {
                return Err(CallError::InvalidState(format!("accept in {}", s.state())));
            }
            let answer = s.local_description.clone()
                .ok_or_else(|| CallError::InvalidState("answer not prepared".to_string()))?;
            let payload = CallAnswerPayload {
                call_id:     s.call_id().unwrap_or_default().to_string(),
                target_id:   s.remote_user_id.clone(),
                answer,
                receiver_id: s.local_user_id.clone(),
            };
            (s.generation, payload)
        };

        let result = self.emit_answer(gen, payload).await;
        self.settle(gen, result).await
    }

    async fn emit_answer(&self, gen: u64, payload: CallAnswerPayload) -> CallResult<()> {
        let call_id = payload.call_id.clone();
        self.inner.transport.send(SignalMessage::CallAnswer(payload)).await?;

        let (states, queued) = self.with_session(gen, |s| {
            s.description_emitted = true;
            (Self::advance_to_answered(s), std::mem::take(&mut s.outgoing_candidates))
        })?;
        for state in states {
            self.publish_state(Some(call_id.clone()), state);
        }
        self.send_candidates(gen, queued).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 원격 이벤트
    // ------------------------------------------------------------------------

    pub async fn on_remote_answer(&self, payload: CallAnswerPayload) -> CallResult<()> {
        let (gen, peer) = {
            let slot = self.inner.slot.lock().unwrap();
            let gen = self.correlate(&slot, &payload.call_id, &payload.target_id, Some(&payload.receiver_id))?;
            let Some(s) = slot.session.as_ref() else { return Err(CallError::Cancelled) };
            if s.role != CallRole::Caller {
                return Err(CallError::InvalidState("call-answer received by callee".to_string()));
            }
            if s.remote_description.is_some() {
                debug!("[engine] duplicate call-answer ignored call_id={}", payload.call_id);
                return Ok(());
            }
            if s.state() != CallState::OfferSent {
                let mismatch = CallError::NegotiationStateMismatch {
                    expected: CallState::OfferSent.to_string(),
                    actual:   s.state().to_string(),
                };
                warn!("[engine] call-answer: {}, applying anyway", mismatch);
            }
            let peer = s.peer.clone()
                .ok_or_else(|| CallError::InvalidState("call-answer before peer session".to_string()))?;
            (gen, peer)
        };

        let result = self.apply_answer(gen, &peer, payload.answer).await;
        self.settle(gen, result).await
    }

    async fn apply_answer(&self, gen: u64, peer: &PeerSession, answer: SessionDescription) -> CallResult<()> {
        peer.set_remote_description(&answer).await?;
        let (call_id, states) = self.with_session(gen, |s| {
            s.remote_description = Some(answer);
            (s.call_id().map(str::to_string), Self::advance_to_answered(s))
        })?;
        for state in states {
            self.publish_state(call_id.clone(), state);
        }
        Ok(())
    }

    /// 원격 candidate: 피어 세션이 있으면 적용/큐잉, 없으면 세션 버퍼
    pub async fn on_remote_ice_candidate(&self, payload: IceCandidatePayload) -> CallResult<CandidateDisposition> {
        let peer = {
            let mut slot = self.inner.slot.lock().unwrap();
            self.correlate(&slot, &payload.call_id, &payload.target_id, Some(&payload.sender_id))?;
            let Some(s) = slot.session.as_mut() else { return Err(CallError::Cancelled) };
            match s.peer.clone() {
                Some(peer) => peer,
                None => {
                    s.pending_remote_candidates.push_back(payload.candidate);
                    trace!("[engine] candidate buffered before peer (n={})", s.pending_remote_candidates.len());
                    return Ok(CandidateDisposition::Queued);
                }
            }
        };
        Ok(peer.add_remote_candidate(payload.candidate).await)
    }

    /// 상대 종료: 정리 후 Ended. call-end 재송신 없음
    pub async fn on_remote_call_end(&self, payload: CallEndPayload) -> CallResult<()> {
        let gen = {
            let slot = self.inner.slot.lock().unwrap();
            self.correlate(&slot, &payload.call_id, &payload.target_id, None)?
        };
        info!("[engine] remote ended call_id={}", payload.call_id);
        self.finish(gen, CallState::Ended, None, false).await;
        Ok(())
    }

    /// 릴레이 에러. 활성 통화 대상이면 (USER_OFFLINE 등) 통화 실패 처리
    async fn on_relay_error(&self, err: ErrorPayload) -> CallResult<()> {
        let target = {
            let slot = self.inner.slot.lock().unwrap();
            match (&err.call_id, slot.session.as_ref()) {
                (Some(id), Some(s)) if s.matches(id) => Some((s.generation, s.remote_user_id.clone())),
                _ => None,
            }
        };
        let Some((gen, remote)) = target else {
            warn!("[engine] relay error code={} reason={}", err.code, err.reason);
            return Ok(());
        };
        let error = match err.code {
            error_code::USER_OFFLINE => CallError::UserOffline(remote),
            _ => CallError::InternalError(err.reason),
        };
        warn!("[engine] relay rejected active call: {}", error);
        self.finish(gen, CallState::Failed, Some(error), false).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 사용자 조작
    // ------------------------------------------------------------------------

    /// 멱등. callId 가 있으면 call-end 1회 송신
    pub async fn hangup(&self) {
        let gen = {
            let slot = self.inner.slot.lock().unwrap();
            match slot.session.as_ref() {
                Some(s) => s.generation,
                None => {
                    debug!("[engine] hangup with no active call");
                    return;
                }
            }
        };
        self.finish(gen, CallState::Ended, None, true).await;
    }

    /// 로컬 오디오 토글. 반환값: 음소거 여부 (스트림 없으면 None)
    pub fn toggle_mute(&self) -> Option<bool> {
        self.toggle_tracks(TrackKind::Audio).map(|enabled| !enabled)
    }

    /// 로컬 비디오 토글. 반환값: 비디오 켜짐 여부 (비디오 트랙 없으면 None)
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle_tracks(TrackKind::Video)
    }

    fn toggle_tracks(&self, kind: TrackKind) -> Option<bool> {
        let tracks = self.read_session(|s| s.local_tracks(kind)).unwrap_or_default();
        let Some(first) = tracks.first() else {
            warn!("[engine] toggle {} with no local track", kind);
            return None;
        };
        let enable = !first.is_enabled();
        for track in &tracks {
            track.set_enabled(enable);
        }
        debug!("[engine] local {} enabled={}", kind, enable);
        Some(enable)
    }

    // ------------------------------------------------------------------------
    // 시그널 디스패치
    // ------------------------------------------------------------------------

    pub async fn handle_signal(&self, message: SignalMessage) -> CallResult<()> {
        match message {
            SignalMessage::CallOffer(p)    => self.on_remote_offer(p).await,
            SignalMessage::CallAnswer(p)   => self.on_remote_answer(p).await,
            SignalMessage::IceCandidate(p) => self.on_remote_ice_candidate(p).await.map(|_| ()),
            SignalMessage::CallEnd(p)      => self.on_remote_call_end(p).await,
            SignalMessage::Error(e)        => self.on_relay_error(e).await,
        }
    }

    /// 시그널링 구독 루프 시작. 엔진이 drop 되면 종료
    ///
    /// offer 는 세션 설치까지만 루프 안에서 처리하고 answer 준비는 별도 태스크로 넘긴다.
    /// 그래야 뒤따르는 candidate 가 준비 중에도 세션 버퍼에 쌓인다.
    pub fn listen(&self) -> JoinHandle<()> {
        let mut rx = self.inner.transport.subscribe();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let message = match rx.recv().await {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[engine] signal listener lagged, {} message(s) dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                let engine = CallEngine { inner };

                let event = message.event_name();
                let result = match message {
                    SignalMessage::CallOffer(offer) => match engine.begin_incoming(&offer) {
                        Ok((gen, kind, old)) => {
                            let worker = engine.clone();
                            tokio::spawn(async move {
                                if let Err(e) = worker.prepare_answer(gen, kind, old, offer).await {
                                    debug!("[engine] answer preparation stopped: {}", e);
                                }
                            });
                            Ok(())
                        }
                        Err(e) => Err(e),
                    },
                    other => engine.handle_signal(other).await,
                };

                match result {
                    Ok(()) => {}
                    Err(e @ CallError::CorrelationMismatch { .. }) => warn!("[engine] {} discarded: {}", event, e),
                    Err(CallError::Cancelled) => debug!("[engine] {} arrived during teardown", event),
                    Err(e) if e.is_fatal() => debug!("[engine] {} failed the call: {}", event, e),
                    Err(e) => warn!("[engine] {} ignored: {}", event, e),
                }
            }
            debug!("[engine] signal listener exit");
        })
    }

    // ------------------------------------------------------------------------
    // 내부: 세션 수명
    // ------------------------------------------------------------------------

    fn read_session<R>(&self, f: impl FnOnce(&CallSession) -> R) -> Option<R> {
        let slot = self.inner.slot.lock().unwrap();
        slot.session.as_ref().map(f)
    }

    fn with_session<R>(&self, gen: u64, f: impl FnOnce(&mut CallSession) -> R) -> CallResult<R> {
        let mut slot = self.inner.slot.lock().unwrap();
        match slot.session.as_mut() {
            Some(s) if s.generation == gen => Ok(f(s)),
            _ => Err(CallError::Cancelled),
        }
    }

    fn ensure_live(&self, gen: u64) -> CallResult<()> {
        self.with_session(gen, |_| ())
    }

    fn is_live(&self, gen: u64) -> bool {
        self.ensure_live(gen).is_ok()
    }

    /// 새 세션 설치. 기존 세션은 꺼내서 반환 (호출자가 teardown)
    /// 미디어 해제는 슬롯 잠금 안에서 → 새 세션의 acquire 와 엇갈리지 않음
    fn install(
        &self,
        guard: impl FnOnce(Option<&CallSession>) -> CallResult<()>,
        build: impl FnOnce(u64) -> CallSession,
    ) -> CallResult<(u64, Option<CallSession>)> {
        let mut slot = self.inner.slot.lock().unwrap();
        guard(slot.session.as_ref())?;
        slot.generation += 1;
        let gen = slot.generation;
        let old = slot.session.take();
        self.inner.media.release();
        slot.session = Some(build(gen));
        Ok((gen, old))
    }

    /// 세션 종료. 이미 다른 세대면 false
    async fn finish(&self, gen: u64, outcome: CallState, error: Option<CallError>, notify_remote: bool) -> bool {
        let session = {
            let mut slot = self.inner.slot.lock().unwrap();
            match slot.session.take() {
                Some(s) if s.generation == gen => {
                    slot.generation += 1;
                    slot.state = outcome;
                    self.inner.media.release();
                    s
                }
                other => {
                    slot.session = other;
                    return false;
                }
            }
        };

        let call_id = session.call_id().map(str::to_string);
        let prev = session.state();
        let lived_ms = current_timestamp().saturating_sub(session.created_at);
        self.teardown(session, notify_remote).await;

        match &error {
            Some(e) => warn!(
                "[engine] call failed call_id={} in {} after {}ms: {}",
                call_id.as_deref().unwrap_or("-"), prev, lived_ms, e
            ),
            None => info!(
                "[engine] call ended call_id={} (was {}, {}ms)",
                call_id.as_deref().unwrap_or("-"), prev, lived_ms
            ),
        }
        self.publish_state(call_id.clone(), outcome);
        if let Some(error) = error {
            self.publish(CallEvent::Failed { call_id, error });
        }
        true
    }

    /// 분리된 세션 자원 정리: 로컬 트랙 stop → 피어 close → (옵션) call-end
    async fn teardown(&self, mut session: CallSession, notify_remote: bool) {
        if let Some(stream) = session.local_stream.take() {
            stream.stop_all();
        }
        session.pending_remote_candidates.clear();
        session.outgoing_candidates.clear();
        if let Some(peer) = session.peer.take() {
            peer.close().await;
        }

        if !notify_remote {
            return;
        }
        let Some(call_id) = session.call_id() else {
            debug!("[engine] no callId yet, call-end not sent");
            return;
        };
        let end = SignalMessage::CallEnd(CallEndPayload {
            call_id:   call_id.to_string(),
            target_id: session.remote_user_id.clone(),
        });
        if let Err(e) = self.inner.transport.send(end).await {
            warn!("[engine] call-end not delivered call_id={}: {}", call_id, e);
        }
    }

    /// 비동기 흐름의 결과 정리
    /// - Cancelled / TransportUnavailable: 세션 유지 (또는 이미 정리됨)
    /// - 그 외: 아직 같은 세대면 Failed 로 종료
    async fn settle<T>(&self, gen: u64, result: CallResult<T>) -> CallResult<T> {
        match result {
            Ok(v) => Ok(v),
            Err(CallError::Cancelled) => {
                debug!("[engine] step cancelled (gen={})", gen);
                Err(CallError::Cancelled)
            }
            Err(CallError::TransportUnavailable) => {
                warn!("[engine] signaling unavailable, session kept in {}", self.state());
                Err(CallError::TransportUnavailable)
            }
            Err(e) => {
                if !self.is_live(gen) {
                    debug!("[engine] error after teardown ignored: {}", e);
                    return Err(CallError::Cancelled);
                }
                self.finish(gen, CallState::Failed, Some(e.clone()), true).await;
                Err(e)
            }
        }
    }

    fn advance_to_answered(s: &mut CallSession) -> Vec<CallState> {
        let mut states = Vec::with_capacity(2);
        if s.transition(CallState::AnswerExchanged).is_ok() {
            states.push(CallState::AnswerExchanged);
            if s.settle_connected() {
                states.push(CallState::Connected);
            }
        }
        states
    }

    /// callId + targetId(+sender) 대조. 일치하면 세션 세대 반환
    fn correlate(&self, slot: &Slot, call_id: &str, target_id: &str, sender_id: Option<&str>) -> CallResult<u64> {
        let local = &self.inner.config.local_user_id;
        let Some(s) = slot.session.as_ref() else {
            return Err(CallError::CorrelationMismatch { expected: None, got: call_id.to_string() });
        };
        if !s.matches(call_id) {
            return Err(CallError::CorrelationMismatch {
                expected: s.call_id().map(str::to_string),
                got:      call_id.to_string(),
            });
        }
        if !target_id.is_empty() && target_id != local {
            return Err(CallError::CorrelationMismatch { expected: Some(local.clone()), got: target_id.to_string() });
        }
        if let Some(sender) = sender_id.filter(|id| !id.is_empty()) {
            if sender != s.remote_user_id {
                return Err(CallError::CorrelationMismatch {
                    expected: Some(s.remote_user_id.clone()),
                    got:      sender.to_string(),
                });
            }
        }
        Ok(s.generation)
    }

    // ------------------------------------------------------------------------
    // 내부: 미디어 / 피어
    // ------------------------------------------------------------------------

    async fn attach_local_media(&self, gen: u64, kind: MediaKind) -> CallResult<MediaStream> {
        let stream = self.inner.media.acquire(kind).await?;
        if let Err(e) = self.with_session(gen, |s| s.local_stream = Some(stream.clone())) {
            stream.stop_all();
            return Err(e);
        }
        self.publish(CallEvent::LocalStream(stream.clone()));
        Ok(stream)
    }

    async fn open_peer(&self, gen: u64, kind: MediaKind) -> CallResult<Arc<PeerSession>> {
        let (backend, events) = self.inner.peers.create(kind).await?;
        let peer = Arc::new(PeerSession::open(backend, kind).await?);

        let attached = self.with_session(gen, |s| {
            peer.queue_candidates(s.pending_remote_candidates.drain(..));
            s.peer = Some(Arc::clone(&peer));
        });
        if let Err(e) = attached {
            peer.close().await;
            return Err(e);
        }

        self.spawn_peer_pump(gen, events);
        Ok(peer)
    }

    /// 백엔드 이벤트 펌프. 세대가 바뀌면 종료
    fn spawn_peer_pump(&self, gen: u64, mut events: mpsc::Receiver<PeerEvent>) {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let engine = CallEngine { inner };
                if !engine.is_live(gen) {
                    break;
                }
                engine.on_peer_event(gen, event).await;
            }
            trace!("[engine] peer event pump exit gen={}", gen);
        });
    }

    async fn on_peer_event(&self, gen: u64, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => self.on_local_candidate(gen, candidate).await,
            PeerEvent::RemoteTrack(track) => {
                let Ok(Some(peer)) = self.with_session(gen, |s| s.peer.clone()) else { return };
                if let Some(stream) = peer.on_remote_track(track) {
                    self.publish(CallEvent::RemoteStream(stream));
                }
            }
            PeerEvent::ConnectionState(state) => self.on_connection_state(gen, state).await,
        }
    }

    /// offer/answer 송신 전이면 보관, 이후면 즉시 송신
    async fn on_local_candidate(&self, gen: u64, candidate: IceCandidate) {
        let ready = self.with_session(gen, |s| {
            if s.description_emitted {
                Some(candidate)
            } else {
                s.outgoing_candidates.push(candidate);
                None
            }
        });
        if let Ok(Some(candidate)) = ready {
            self.send_candidates(gen, vec![candidate]).await;
        }
    }

    async fn send_candidates(&self, gen: u64, candidates: Vec<IceCandidate>) {
        if candidates.is_empty() {
            return;
        }
        let Ok(Some((call_id, local, remote))) = self.with_session(gen, |s| {
            s.call_id().map(|id| (id.to_string(), s.local_user_id.clone(), s.remote_user_id.clone()))
        }) else {
            return;
        };

        for candidate in candidates {
            let msg = SignalMessage::IceCandidate(IceCandidatePayload {
                call_id:   call_id.clone(),
                target_id: remote.clone(),
                candidate,
                sender_id: local.clone(),
            });
            if let Err(e) = self.inner.transport.send(msg).await {
                warn!("[engine] ice-candidate dropped call_id={}: {}", call_id, e);
                if e == CallError::TransportUnavailable {
                    break;
                }
            }
        }
    }

    async fn on_connection_state(&self, gen: u64, state: ConnectionState) {
        match state {
            ConnectionState::Connected | ConnectionState::Completed => {
                let changed = self.with_session(gen, |s| {
                    s.connectivity_up = true;
                    s.settle_connected().then(|| s.call_id().map(str::to_string))
                });
                if let Ok(Some(call_id)) = changed {
                    self.publish_state(call_id, CallState::Connected);
                }
            }
            ConnectionState::Failed => {
                let Ok(Some(peer)) = self.with_session(gen, |s| s.peer.clone()) else { return };
                match peer.handle_connectivity_failure().await {
                    FailureAction::Restarting => info!("[engine] ICE restart in progress (gen={})", gen),
                    FailureAction::GiveUp => {
                        self.finish(gen, CallState::Failed, Some(CallError::ConnectivityFailure), true).await;
                    }
                }
            }
            ConnectionState::Disconnected => {
                let _ = self.with_session(gen, |s| s.connectivity_up = false);
                info!("[engine] connectivity disconnected (gen={}), waiting for recovery", gen);
            }
            ConnectionState::Closed => debug!("[engine] peer connection closed (gen={})", gen),
            ConnectionState::New | ConnectionState::Checking => trace!("[engine] connectivity {:?}", state),
        }
    }

    // ------------------------------------------------------------------------
    // 내부: 통지
    // ------------------------------------------------------------------------

    fn publish(&self, event: CallEvent) {
        // 구독자 없으면 무시
        let _ = self.inner.events.send(event);
    }

    fn publish_state(&self, call_id: Option<String>, state: CallState) {
        debug!("[engine] state -> {} call_id={}", state, call_id.as_deref().unwrap_or("-"));
        self.publish(CallEvent::StateChanged { call_id, state });
    }
}
