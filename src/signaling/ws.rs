// author: kodeholic (powered by Claude)
// WebSocket 시그널링 클라이언트 (엔진 → 릴레이)
//
// 연결 순서: connect → hello 수신 → identify 송신 → ready 대기
// 이후 태스크 3개:
//   - writer    : mpsc → ws sink
//   - reader    : ws stream → SignalMessage broadcast
//   - heartbeat : HEARTBEAT_INTERVAL_MS 주기로 heartbeat 송신
// 어느 한쪽이라도 끊기면 connected=false → 이후 send 는 TransportUnavailable

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::config;
use crate::error::{CallError, CallResult};
use crate::protocol::error_code;
use crate::protocol::event::{client, server};
use crate::protocol::message::{ErrorPayload, IdentifyPayload, ReadyPayload, SignalPacket};
use crate::signaling::{SignalMessage, SignalingTransport};

pub struct WsSignaling {
    user_id:    String,
    session_id: String,
    outbound:   mpsc::Sender<String>,
    inbound:    broadcast::Sender<SignalMessage>,
    connected:  Arc<AtomicBool>,
    tasks:      Mutex<Vec<JoinHandle<()>>>,
}

impl WsSignaling {
    /// url 예: "ws://127.0.0.1:8080/ws"
    pub async fn connect(url: &str, user_id: &str, token: &str) -> CallResult<Arc<Self>> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| CallError::IoError(format!("ws connect {}: {}", url, e)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let identify = SignalPacket::new(client::IDENTIFY, IdentifyPayload {
            user_id: user_id.to_string(),
            token:   token.to_string(),
        });
        ws_tx.send(Message::Text(identify.to_json().into()))
            .await
            .map_err(|e| CallError::IoError(e.to_string()))?;

        // hello 는 건너뛰고 ready / error 까지 대기
        let handshake = async {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(CallError::IoError(e.to_string())),
                };
                let packet: SignalPacket = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[signal] unparseable frame during handshake: {}", e);
                        continue;
                    }
                };
                match packet.event.as_str() {
                    server::READY => {
                        let ready: Option<ReadyPayload> = packet.data.and_then(|d| serde_json::from_value(d).ok());
                        return ready.ok_or_else(|| CallError::InvalidPayload("ready".to_string()));
                    }
                    server::ERROR => {
                        let err: Option<ErrorPayload> = packet.data.and_then(|d| serde_json::from_value(d).ok());
                        return Err(match err {
                            Some(e) if e.code == error_code::INVALID_TOKEN => CallError::InvalidToken,
                            Some(e) => CallError::InternalError(e.reason),
                            None    => CallError::NotAuthenticated,
                        });
                    }
                    other => trace!("[signal] handshake skip event={}", other),
                }
            }
            Err(CallError::IoError("connection closed before ready".to_string()))
        };

        let ready = tokio::time::timeout(Duration::from_millis(config::IDENTIFY_TIMEOUT_MS), handshake)
            .await
            .map_err(|_| CallError::IoError("identify timeout".to_string()))??;

        info!("[signal] identified user={} session={}", ready.user_id, ready.session_id);

        let (out_tx, mut out_rx) = mpsc::channel::<String>(config::SIGNAL_BUF);
        let (in_tx, _) = broadcast::channel::<SignalMessage>(config::SIGNAL_BUF);
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = Arc::clone(&connected);
        let writer = tokio::spawn(async move {
            while let Some(json) = out_rx.recv().await {
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            writer_connected.store(false, Ordering::Relaxed);
            let _ = ws_tx.close().await;
            debug!("[signal] writer task exit");
        });

        let reader_connected = Arc::clone(&connected);
        let reader_tx = in_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("[signal] ws read error: {}", e);
                        break;
                    }
                };
                let packet: SignalPacket = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[signal] bad packet: {}", e);
                        continue;
                    }
                };
                let event = packet.event.clone();
                match SignalMessage::from_packet(packet) {
                    Ok(Some(msg)) => {
                        trace!("[signal] <- {}", event);
                        // 구독자 없으면 그냥 버림
                        let _ = reader_tx.send(msg);
                    }
                    Ok(None) => trace!("[signal] <- {} (control)", event),
                    Err(e) => warn!("[signal] <- {} dropped: {}", event, e),
                }
            }
            reader_connected.store(false, Ordering::Relaxed);
            info!("[signal] connection closed");
        });

        let hb_tx = out_tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(config::HEARTBEAT_INTERVAL_MS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if hb_tx.send(SignalPacket::no_data(client::HEARTBEAT).to_json()).await.is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(Self {
            user_id:    ready.user_id,
            session_id: ready.session_id,
            outbound:   out_tx,
            inbound:    in_tx,
            connected,
            tasks:      Mutex::new(vec![writer, reader, heartbeat]),
        }))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for WsSignaling {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl SignalingTransport for WsSignaling {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn send(&self, message: SignalMessage) -> CallResult<()> {
        if !self.is_connected() {
            return Err(CallError::TransportUnavailable);
        }
        trace!("[signal] -> {} call_id={:?}", message.event_name(), message.call_id());
        self.outbound
            .send(message.to_packet().to_json())
            .await
            .map_err(|_| CallError::TransportUnavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.inbound.subscribe()
    }
}
