// author: kodeholic (powered by Claude)
// 시그널링 릴레이 — WS 연결당 세션 루프
//
// 릴레이는 SDP/candidate 내용을 해석하지 않는다. 하는 일:
//   - identify 토큰 검증 후 user_id 로 라우팅 테이블 등록
//   - targetId 로 1:1 중계, 발신자 id 는 인증된 값으로 덮어씀 (callerId/receiverId/senderId)
//   - CallRegistry 상태 갱신 + TraceHub 관찰 이벤트 발행

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config;
use crate::core::{CallRegistry, UserHub};
use crate::error::CallError;
use crate::protocol::{
    error_code::to_error_code,
    event::{call, client, server},
    message::{
        CallAnswerPayload, CallEndPayload, CallOfferPayload, ErrorPayload, HelloPayload, IceCandidatePayload,
        IdentifyPayload, MediaKind, ReadyPayload, SignalPacket,
    },
};
use crate::trace::{TraceEvent, TraceHub};
use crate::utils::random_id;

// ----------------------------------------------------------------------------
// [공유 상태]
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub user_hub:      Arc<UserHub>,
    pub call_registry: Arc<CallRegistry>,
    pub trace_hub:     Arc<TraceHub>,
}

// ----------------------------------------------------------------------------
// [WS 진입점]
// ----------------------------------------------------------------------------

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

struct Session {
    user_id: Option<String>,
}

impl Session {
    fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

// ----------------------------------------------------------------------------
// [핵심] 개별 클라이언트 WS 생명주기
// ----------------------------------------------------------------------------

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (egress_tx, mut egress_rx) = mpsc::channel::<String>(config::EGRESS_QUEUE_SIZE);

    let mut session = Session { user_id: None };

    let hello = make_packet(server::HELLO, HelloPayload {
        heartbeat_interval: config::HEARTBEAT_INTERVAL_MS,
    });
    if ws_tx.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    // [egress] 큐 → WS 송신
    let egress_loop = tokio::spawn(async move {
        while let Some(json) = egress_rx.recv().await {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // [ingress] WS 수신 → 핸들러 dispatch
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t))  => t,
            Ok(Message::Close(_)) => break,
            Err(e) => { warn!("[relay] ws error: {}", e); break; }
            _ => continue,
        };

        let packet: SignalPacket = match serde_json::from_str(&text) {
            Ok(p)  => p,
            Err(e) => {
                warn!("[relay] bad packet: {}", e);
                let _ = egress_tx.send(error_packet(CallError::InvalidPayload(e.to_string()), None)).await;
                continue;
            }
        };

        if packet.event != client::IDENTIFY && packet.event != client::HEARTBEAT && !session.is_authenticated() {
            let _ = egress_tx.send(error_packet(CallError::NotAuthenticated, None)).await;
            continue;
        }

        if let Some(user_id) = &session.user_id {
            if let Some(user) = state.user_hub.get(user_id) {
                user.touch();
            }
        }

        if packet.event != client::HEARTBEAT {
            let call_id = packet_call_id(&packet);
            state.trace_hub.publish(TraceEvent::inbound(
                call_id.as_deref(), session.user_id.as_deref(), &packet.event,
            ));
        }

        let event = packet.event.clone();
        let result = match event.as_str() {
            client::HEARTBEAT   => handle_heartbeat(&egress_tx).await,
            client::IDENTIFY    => handle_identify(&egress_tx, &mut session, &state, packet).await,
            call::CALL_OFFER    => handle_call_offer(&egress_tx, &session, &state, packet).await,
            call::CALL_ANSWER   => handle_call_answer(&egress_tx, &session, &state, packet).await,
            call::ICE_CANDIDATE => handle_ice_candidate(&egress_tx, &session, &state, packet).await,
            call::CALL_END      => handle_call_end(&egress_tx, &session, &state, packet).await,
            unknown => {
                warn!("[relay] unknown event: {}", unknown);
                send(&egress_tx, error_packet(CallError::UnknownEvent(unknown.to_string()), None)).await
            }
        };

        if let Err(e) = result {
            match e {
                CallError::InvalidPayload(_) | CallError::InvalidToken => {
                    debug!("[relay] {} rejected: {}", event, e);
                    let _ = egress_tx.send(error_packet(e, None)).await;
                }
                other => error!("[relay] {} handler error: {}", event, other),
            }
        }
    }

    cleanup(&session, &egress_tx, &state).await;
    egress_loop.abort();
}

// ----------------------------------------------------------------------------
// [이벤트 핸들러]
// ----------------------------------------------------------------------------

async fn handle_heartbeat(tx: &mpsc::Sender<String>) -> Result<(), CallError> {
    trace!("[relay] heartbeat");
    send(tx, make_no_data(server::HEARTBEAT_ACK)).await
}

async fn handle_identify(
    tx:      &mpsc::Sender<String>,
    session: &mut Session,
    state:   &AppState,
    packet:  SignalPacket,
) -> Result<(), CallError> {
    let payload = parse_payload::<IdentifyPayload>(packet.data)?;
    if payload.user_id.is_empty() {
        return Err(CallError::InvalidPayload("user_id is empty".to_string()));
    }
    if payload.token != config::secret_key() {
        warn!("[relay] identify token mismatch user_id={}", payload.user_id);
        return Err(CallError::InvalidToken);
    }

    let session_id = format!("sess_{}", random_id(12));
    state.user_hub.register(&payload.user_id, tx.clone(), session_id.clone());
    session.user_id = Some(payload.user_id.clone());
    info!("[relay] identified user={} session={}", payload.user_id, session_id);

    send(tx, make_packet(server::READY, ReadyPayload {
        session_id,
        user_id: payload.user_id,
    })).await
}

async fn handle_call_offer(
    tx:      &mpsc::Sender<String>,
    session: &Session,
    state:   &AppState,
    packet:  SignalPacket,
) -> Result<(), CallError> {
    let mut payload = parse_payload::<CallOfferPayload>(packet.data)?;
    let from = authenticated(session)?;
    require_ids(&payload.call_id, &payload.target_id)?;
    if payload.target_id == from {
        return Err(CallError::InvalidPayload("cannot call yourself".to_string()));
    }
    payload.caller_id = from.to_string();

    let call_type = payload.call_type.as_deref().and_then(MediaKind::from_call_type);
    state.call_registry.on_offer(&payload.call_id, from, &payload.target_id, call_type);

    let call_id = payload.call_id.clone();
    let target  = payload.target_id.clone();
    if relay(state, from, &target, &call_id, call::CALL_OFFER, &payload).await {
        return Ok(());
    }

    // 수신자 오프라인 → missed 처리 후 발신자에게 에러
    state.call_registry.on_end(&call_id, from);
    send(tx, error_packet(CallError::UserOffline(target), Some(&call_id))).await
}

async fn handle_call_answer(
    tx:      &mpsc::Sender<String>,
    session: &Session,
    state:   &AppState,
    packet:  SignalPacket,
) -> Result<(), CallError> {
    let mut payload = parse_payload::<CallAnswerPayload>(packet.data)?;
    let from = authenticated(session)?;
    require_ids(&payload.call_id, &payload.target_id)?;
    payload.receiver_id = from.to_string();

    state.call_registry.on_answer(&payload.call_id);

    let call_id = payload.call_id.clone();
    let target  = payload.target_id.clone();
    if relay(state, from, &target, &call_id, call::CALL_ANSWER, &payload).await {
        return Ok(());
    }
    send(tx, error_packet(CallError::UserOffline(target), Some(&call_id))).await
}

async fn handle_ice_candidate(
    _tx:     &mpsc::Sender<String>,
    session: &Session,
    state:   &AppState,
    packet:  SignalPacket,
) -> Result<(), CallError> {
    let mut payload = parse_payload::<IceCandidatePayload>(packet.data)?;
    let from = authenticated(session)?;
    require_ids(&payload.call_id, &payload.target_id)?;
    payload.sender_id = from.to_string();

    let call_id = payload.call_id.clone();
    let target  = payload.target_id.clone();
    // candidate 유실은 통화 실패 사유가 아님 → 에러 응답 없음
    relay(state, from, &target, &call_id, call::ICE_CANDIDATE, &payload).await;
    Ok(())
}

async fn handle_call_end(
    _tx:     &mpsc::Sender<String>,
    session: &Session,
    state:   &AppState,
    packet:  SignalPacket,
) -> Result<(), CallError> {
    let mut payload = parse_payload::<CallEndPayload>(packet.data)?;
    let from = authenticated(session)?;
    if payload.call_id.is_empty() {
        return Err(CallError::InvalidPayload("callId is required".to_string()));
    }

    // targetId 누락 시 이력에서 상대방 추정
    if payload.target_id.is_empty() {
        payload.target_id = state.call_registry
            .get(&payload.call_id)
            .and_then(|r| r.counterpart_of(from).map(str::to_string))
            .ok_or_else(|| CallError::CallNotFound(payload.call_id.clone()))?;
    }

    let status = state.call_registry.on_end(&payload.call_id, from);
    debug!("[relay] call-end call_id={} by={} status={:?}", payload.call_id, from, status);

    let call_id = payload.call_id.clone();
    let target  = payload.target_id.clone();
    relay(state, from, &target, &call_id, call::CALL_END, &payload).await;
    Ok(())
}

// ----------------------------------------------------------------------------
// [종료 처리] WS 끊김 / reaper 공용
// ----------------------------------------------------------------------------

/// user 가 당사자인 열린 통화를 모두 닫고 상대방에게 call-end 통지
pub async fn end_calls_for_user(
    user_hub:      &UserHub,
    call_registry: &CallRegistry,
    trace_hub:     &TraceHub,
    user_id:       &str,
    reason:        &str,
) -> usize {
    let open = call_registry.open_calls_of(user_id);
    for (call_id, counterpart) in &open {
        call_registry.on_end(call_id, user_id);
        if let Some(peer) = counterpart {
            notify_call_end(user_hub, trace_hub, call_id, peer, reason).await;
        }
    }
    open.len()
}

/// 릴레이 발 call-end (targetId = 수신자 본인)
pub async fn notify_call_end(user_hub: &UserHub, trace_hub: &TraceHub, call_id: &str, user_id: &str, reason: &str) {
    let json = make_packet(call::CALL_END, CallEndPayload {
        call_id:   call_id.to_string(),
        target_id: user_id.to_string(),
    });
    let delivered = user_hub.send_to(user_id, &json).await;
    trace_hub.publish(TraceEvent::system(
        call_id, user_id, call::CALL_END, format!("{} (delivered={})", reason, delivered),
    ));
}

async fn cleanup(session: &Session, tx: &mpsc::Sender<String>, state: &AppState) {
    let Some(user_id) = session.user_id.as_deref() else {
        return;
    };

    // 재접속으로 이미 교체된 연결이면 라우팅/통화 정리는 새 연결 몫
    if !state.user_hub.unregister_if_current(user_id, tx) {
        debug!("[relay] stale connection closed user={}", user_id);
        return;
    }

    let ended = end_calls_for_user(&state.user_hub, &state.call_registry, &state.trace_hub, user_id, "peer disconnected").await;
    info!("[relay] user={} disconnected, {} open call(s) closed", user_id, ended);
}

// ----------------------------------------------------------------------------
// [내부 유틸]
// ----------------------------------------------------------------------------

/// 대상에게 전달 + trace. 전달 여부 반환
async fn relay(
    state:   &AppState,
    from:    &str,
    target:  &str,
    call_id: &str,
    event:   &str,
    payload: impl serde::Serialize,
) -> bool {
    let delivered = state.user_hub.send_to(target, &make_packet(event, payload)).await;
    let traced = TraceEvent::relayed(call_id, from, target, event, delivered);
    trace!("[relay] {} {}", event, traced.summary);
    state.trace_hub.publish(traced);
    delivered
}

fn authenticated(session: &Session) -> Result<&str, CallError> {
    session.user_id.as_deref().ok_or(CallError::NotAuthenticated)
}

fn require_ids(call_id: &str, target_id: &str) -> Result<(), CallError> {
    if call_id.is_empty() {
        return Err(CallError::InvalidPayload("callId is required".to_string()));
    }
    if target_id.is_empty() {
        return Err(CallError::InvalidPayload("targetId is required".to_string()));
    }
    Ok(())
}

fn packet_call_id(packet: &SignalPacket) -> Option<String> {
    packet.data.as_ref()
        .and_then(|d| d.get("callId"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn parse_payload<T: serde::de::DeserializeOwned>(data: Option<serde_json::Value>) -> Result<T, CallError> {
    let value = data.ok_or_else(|| CallError::InvalidPayload("missing payload".to_string()))?;
    serde_json::from_value(value).map_err(|e| CallError::InvalidPayload(e.to_string()))
}

fn make_packet(event: &str, payload: impl serde::Serialize) -> String {
    SignalPacket::new(event, payload).to_json()
}

fn make_no_data(event: &str) -> String {
    SignalPacket::no_data(event).to_json()
}

fn error_packet(err: CallError, call_id: Option<&str>) -> String {
    make_packet(server::ERROR, ErrorPayload {
        code:    to_error_code(&err),
        reason:  err.to_string(),
        call_id: call_id.map(str::to_string),
    })
}

async fn send(tx: &mpsc::Sender<String>, json: String) -> Result<(), CallError> {
    tx.send(json).await.map_err(|e| CallError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_packet_carries_code_and_call_id() {
        let json = error_packet(CallError::UserOffline("bob".into()), Some("c1"));
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["event"], "error");
        assert_eq!(v["data"]["code"], 2000);
        assert_eq!(v["data"]["callId"], "c1");
    }

    #[test]
    fn call_id_extracted_from_packet() {
        let packet = SignalPacket { event: "call-end".into(), data: Some(serde_json::json!({ "callId": "c9" })) };
        assert_eq!(packet_call_id(&packet).as_deref(), Some("c9"));
        assert!(packet_call_id(&SignalPacket::no_data("heartbeat")).is_none());
    }

    #[test]
    fn missing_ids_rejected() {
        assert!(require_ids("", "bob").is_err());
        assert!(require_ids("c1", "").is_err());
        assert!(require_ids("c1", "bob").is_ok());
    }
}
