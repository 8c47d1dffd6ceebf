// author: kodeholic (powered by Claude)

mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use mini_webcall::call::{CallEngine, CallState, EngineConfig, MediaDevices, PeerFactory};
use mini_webcall::config;
use mini_webcall::core::{CallRegistry, UserHub};
use mini_webcall::protocol::message::MediaKind;
use mini_webcall::signaling::{CallInitiator, HttpCallApi, SignalingTransport, WsSignaling};
use mini_webcall::trace::TraceHub;
use portpicker::pick_unused_port;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ----------------------------------------------------------------------------
// [테스트 헬퍼]
// ----------------------------------------------------------------------------

async fn spawn_test_server() -> String {
    let port = pick_unused_port().expect("사용 가능한 포트를 찾을 수 없습니다.");
    let addr = format!("127.0.0.1:{}", port);

    let app = mini_webcall::build_app(
        Arc::new(UserHub::new()),
        Arc::new(CallRegistry::new()),
        TraceHub::new(),
    );

    let listener = TcpListener::bind(&addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

type WsTx = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRx = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn connect(addr: &str) -> (WsTx, WsRx) {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.expect("WS 연결 실패");
    ws.split()
}

async fn send(tx: &mut WsTx, payload: Value) {
    tx.send(Message::Text(payload.to_string().into())).await.expect("전송 실패");
}

async fn recv(rx: &mut WsRx) -> Value {
    let next = async {
        loop {
            match rx.next().await.expect("수신 실패").expect("메시지 에러") {
                Message::Text(t) => return serde_json::from_str::<Value>(&t).expect("JSON 파싱 실패"),
                _ => continue,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), next).await.expect("수신 타임아웃")
}

fn assert_event(packet: &Value, expected: &str, label: &str) {
    assert_eq!(
        packet["event"].as_str().unwrap_or_default(), expected,
        "{}: 기대 event={}, 실제={}", label, expected, packet
    );
}

/// hello → identify → ready 까지 공통 처리
async fn identify(tx: &mut WsTx, rx: &mut WsRx, user_id: &str) {
    recv(rx).await; // hello
    send(tx, json!({ "event": "identify", "data": { "user_id": user_id, "token": config::secret_key() } })).await;
    let ready = recv(rx).await;
    assert_event(&ready, "ready", "identify");
}

fn offer_json(call_id: &str, target: &str) -> Value {
    json!({
        "event": "call-offer",
        "data": {
            "callId":   call_id,
            "targetId": target,
            "callType": "voice",
            "offer":    { "type": "offer", "sdp": sdp_for(MediaKind::Voice) },
        }
    })
}

fn bearer() -> String {
    format!("Bearer {}", config::secret_key())
}

// ----------------------------------------------------------------------------
// [시나리오 1] hello → identify → ready
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_identify_flow() {
    let addr = spawn_test_server().await;
    let (mut tx, mut rx) = connect(&addr).await;

    let hello = recv(&mut rx).await;
    assert_event(&hello, "hello", "hello");
    assert!(hello["data"]["heartbeat_interval"].as_u64().unwrap() > 0);

    send(&mut tx, json!({ "event": "identify", "data": { "user_id": "alice", "token": config::secret_key() } })).await;

    let ready = recv(&mut rx).await;
    assert_event(&ready, "ready", "ready");
    assert_eq!(ready["data"]["user_id"], "alice");
    assert!(ready["data"]["session_id"].as_str().unwrap().starts_with("sess_"));
}

// ----------------------------------------------------------------------------
// [시나리오 2] 잘못된 토큰 → error 1001
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_token_rejected() {
    let addr = spawn_test_server().await;
    let (mut tx, mut rx) = connect(&addr).await;

    recv(&mut rx).await; // hello
    send(&mut tx, json!({ "event": "identify", "data": { "user_id": "alice", "token": "wrong" } })).await;

    let err = recv(&mut rx).await;
    assert_event(&err, "error", "invalid token");
    assert_eq!(err["data"]["code"], 1001);
}

// ----------------------------------------------------------------------------
// [시나리오 3] 인증 없이 call-offer → error 1000
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unauthenticated_request() {
    let addr = spawn_test_server().await;
    let (mut tx, mut rx) = connect(&addr).await;

    recv(&mut rx).await; // hello
    send(&mut tx, offer_json("call_x", "bob")).await;

    let err = recv(&mut rx).await;
    assert_event(&err, "error", "unauthenticated");
    assert_eq!(err["data"]["code"], 1000);
}

// ----------------------------------------------------------------------------
// [시나리오 4] heartbeat / 알 수 없는 이벤트
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_heartbeat_and_unknown_event() {
    let addr = spawn_test_server().await;
    let (mut tx, mut rx) = connect(&addr).await;
    identify(&mut tx, &mut rx, "alice").await;

    send(&mut tx, json!({ "event": "heartbeat" })).await;
    assert_event(&recv(&mut rx).await, "heartbeat-ack", "heartbeat");

    send(&mut tx, json!({ "event": "call-hold", "data": {} })).await;
    let err = recv(&mut rx).await;
    assert_event(&err, "error", "unknown event");
    assert_eq!(err["data"]["code"], 1003);
}

// ----------------------------------------------------------------------------
// [시나리오 5] call-offer 중계 (callerId 는 서버가 채움)
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_offer_relayed_with_caller_id() {
    let addr = spawn_test_server().await;
    let (mut a_tx, mut a_rx) = connect(&addr).await;
    let (mut b_tx, mut b_rx) = connect(&addr).await;
    identify(&mut a_tx, &mut a_rx, "alice").await;
    identify(&mut b_tx, &mut b_rx, "bob").await;

    let mut offer = offer_json("call_relay", "bob");
    offer["data"]["callerId"] = json!("mallory");
    send(&mut a_tx, offer).await;

    let relayed = recv(&mut b_rx).await;
    assert_event(&relayed, "call-offer", "relayed offer");
    assert_eq!(relayed["data"]["callId"], "call_relay");
    assert_eq!(relayed["data"]["callerId"], "alice");
    assert_eq!(relayed["data"]["offer"]["type"], "offer");

    send(&mut b_tx, json!({
        "event": "call-answer",
        "data": {
            "callId":   "call_relay",
            "targetId": "alice",
            "answer":   { "type": "answer", "sdp": sdp_for(MediaKind::Voice) },
        }
    })).await;

    let answer = recv(&mut a_rx).await;
    assert_event(&answer, "call-answer", "relayed answer");
    assert_eq!(answer["data"]["receiverId"], "bob");
}

// ----------------------------------------------------------------------------
// [시나리오 6] 오프라인 대상 → error 2000 (callId 포함)
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_offer_to_offline_user() {
    let addr = spawn_test_server().await;
    let (mut tx, mut rx) = connect(&addr).await;
    identify(&mut tx, &mut rx, "alice").await;

    send(&mut tx, offer_json("call_offline", "ghost")).await;

    let err = recv(&mut rx).await;
    assert_event(&err, "error", "offline");
    assert_eq!(err["data"]["code"], 2000);
    assert_eq!(err["data"]["callId"], "call_offline");
}

// ----------------------------------------------------------------------------
// [시나리오 7] 연결 종료 → 상대에게 call-end
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_ends_open_call() {
    let addr = spawn_test_server().await;
    let (mut a_tx, mut a_rx) = connect(&addr).await;
    let (mut b_tx, mut b_rx) = connect(&addr).await;
    identify(&mut a_tx, &mut a_rx, "alice").await;
    identify(&mut b_tx, &mut b_rx, "bob").await;

    send(&mut a_tx, offer_json("call_drop", "bob")).await;
    assert_event(&recv(&mut b_rx).await, "call-offer", "offer");

    a_tx.close().await.ok();
    drop(a_rx);

    let end = recv(&mut b_rx).await;
    assert_event(&end, "call-end", "disconnect");
    assert_eq!(end["data"]["callId"], "call_drop");
    assert_eq!(end["data"]["targetId"], "bob");
}

// ----------------------------------------------------------------------------
// [시나리오 8] REST: POST /v1/calls, GET /v1/calls/{id}
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_initiate_call_rest() {
    let addr   = spawn_test_server().await;
    let client = reqwest::Client::new();
    let url    = format!("http://{}/v1/calls", addr);
    let body   = json!({ "targetUserId": "bob", "callType": "video", "settings": { "video": true, "audio": true } });

    let resp = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["success"], false);

    let resp = client.post(&url).header("Authorization", bearer()).json(&body).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["success"], true);
    let call_id = v["data"]["callId"].as_str().unwrap().to_string();
    assert!(call_id.starts_with("call_"));

    let resp = client.get(format!("{}/{}", url, call_id)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let empty = json!({ "targetUserId": "", "callType": "voice", "settings": { "video": false, "audio": true } });
    let resp = client.post(&url).header("Authorization", bearer()).json(&empty).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client.get(format!("{}/call_unknown", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

// ----------------------------------------------------------------------------
// [시나리오 8-1] GET /trace/{call_id}?user= : 통화 + 당사자 필터
// ----------------------------------------------------------------------------

/// SSE 본문에서 다음 data 이벤트 하나
async fn next_trace(resp: &mut reqwest::Response, buf: &mut String) -> Value {
    let next = async {
        loop {
            if let Some(end) = buf.find("\n\n") {
                let frame: String = buf.drain(..end + 2).collect();
                if let Some(json) = frame.lines().find_map(|l| l.strip_prefix("data: ")) {
                    return serde_json::from_str::<Value>(json).expect("trace JSON 파싱 실패");
                }
                continue;
            }
            let chunk = resp.chunk().await.expect("SSE 수신 실패").expect("SSE 종료");
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    };
    tokio::time::timeout(Duration::from_secs(2), next).await.expect("trace 타임아웃")
}

#[tokio::test]
async fn test_trace_stream_filters_by_call_and_user() {
    let addr = spawn_test_server().await;
    let mut sse = reqwest::Client::new()
        .get(format!("http://{}/trace/call_traced?user=bob", addr))
        .send()
        .await
        .unwrap();
    assert!(sse.status().is_success());

    let (mut a_tx, mut a_rx) = connect(&addr).await;
    let (mut b_tx, mut b_rx) = connect(&addr).await;
    identify(&mut a_tx, &mut a_rx, "alice").await;
    identify(&mut b_tx, &mut b_rx, "bob").await;

    // 다른 통화는 걸러짐
    send(&mut a_tx, offer_json("call_other", "bob")).await;
    recv(&mut b_rx).await;
    send(&mut a_tx, offer_json("call_traced", "bob")).await;
    recv(&mut b_rx).await;

    // alice 의 in 이벤트는 bob 과 무관, 릴레이 out 이벤트만 통과
    let mut buf = String::new();
    let event = next_trace(&mut sse, &mut buf).await;
    assert_eq!(event["call_id"], "call_traced");
    assert_eq!(event["dir"], "out");
    assert_eq!(event["event"], "call-offer");
    assert_eq!(event["user_id"], "bob");
    assert_eq!(event["peer_id"], "alice");
    assert_eq!(event["summary"], "alice -> bob");
}

// ----------------------------------------------------------------------------
// [시나리오 9] 엔진 두 개가 실제 릴레이를 거쳐 협상
// ----------------------------------------------------------------------------

struct Endpoint {
    engine: CallEngine,
    peers:  Arc<FakePeerFactory>,
}

async fn endpoint(addr: &str, user_id: &str) -> Endpoint {
    let transport = WsSignaling::connect(&format!("ws://{}/ws", addr), user_id, &config::secret_key())
        .await
        .expect("시그널링 연결 실패");
    let api   = Arc::new(HttpCallApi::new(format!("http://{}", addr), config::secret_key()));
    let peers = FakePeerFactory::new();

    let engine = CallEngine::new(
        EngineConfig::new(user_id),
        transport as Arc<dyn SignalingTransport>,
        api as Arc<dyn CallInitiator>,
        FakeDevices::new() as Arc<dyn MediaDevices>,
        Arc::clone(&peers) as Arc<dyn PeerFactory>,
    );
    engine.listen();
    Endpoint { engine, peers }
}

#[tokio::test]
async fn test_end_to_end_negotiation() {
    let addr  = spawn_test_server().await;
    let alice = endpoint(&addr, "alice").await;
    let bob   = endpoint(&addr, "bob").await;

    let call_id = alice.engine.initiate_call("bob", MediaKind::Video).await.unwrap();
    assert!(call_id.starts_with("call_"));
    assert_eq!(alice.engine.state(), CallState::OfferSent);

    eventually("bob offer received", || bob.engine.state() == CallState::OfferReceived).await;
    assert_eq!(bob.engine.call_id().as_deref(), Some(call_id.as_str()));
    assert_eq!(bob.engine.media_kind(), Some(MediaKind::Video));

    bob.engine.accept_call().await.unwrap();
    assert_eq!(bob.engine.state(), CallState::AnswerExchanged);
    eventually("alice answer applied", || alice.engine.state() == CallState::AnswerExchanged).await;
    assert_eq!(alice.peers.last().remote_sets.load(std::sync::atomic::Ordering::SeqCst), 1);

    alice.engine.hangup().await;
    assert_eq!(alice.engine.state(), CallState::Ended);
    eventually("bob ended", || bob.engine.state() == CallState::Ended).await;
    assert!(bob.peers.last().is_closed());
}

#[tokio::test]
async fn test_engine_reports_offline_callee() {
    let addr  = spawn_test_server().await;
    let alice = endpoint(&addr, "alice").await;

    alice.engine.initiate_call("ghost", MediaKind::Voice).await.unwrap();
    eventually("alice failed", || alice.engine.state() == CallState::Failed).await;
    assert!(alice.peers.last().is_closed());
}
