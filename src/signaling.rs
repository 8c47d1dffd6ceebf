// author: kodeholic (powered by Claude)
// Signaling Transport 추상화
//
// 엔진은 전송 방식(WebSocket 등)을 모른다. 이 모듈의 trait 만 본다.
//   - SignalingTransport : call-offer / call-answer / ice-candidate / call-end 송수신
//   - CallInitiator      : 발신 전 callId 발급 (REST)

pub mod api;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{CallError, CallResult};
use crate::protocol::event::{call, server};
use crate::protocol::message::{
    CallAnswerPayload, CallEndPayload, CallOfferPayload, ErrorPayload, IceCandidatePayload, SignalPacket,
};

pub use api::{CallInitiator, HttpCallApi};
pub use ws::WsSignaling;

/// 엔진이 주고받는 시그널 (event + 타입이 정해진 payload)
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    CallOffer(CallOfferPayload),
    CallAnswer(CallAnswerPayload),
    IceCandidate(IceCandidatePayload),
    CallEnd(CallEndPayload),
    /// 릴레이가 보낸 에러 (USER_OFFLINE 등)
    Error(ErrorPayload),
}

impl SignalMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::CallOffer(_)    => call::CALL_OFFER,
            SignalMessage::CallAnswer(_)   => call::CALL_ANSWER,
            SignalMessage::IceCandidate(_) => call::ICE_CANDIDATE,
            SignalMessage::CallEnd(_)      => call::CALL_END,
            SignalMessage::Error(_)        => server::ERROR,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SignalMessage::CallOffer(p)    => Some(&p.call_id),
            SignalMessage::CallAnswer(p)   => Some(&p.call_id),
            SignalMessage::IceCandidate(p) => Some(&p.call_id),
            SignalMessage::CallEnd(p)      => Some(&p.call_id),
            SignalMessage::Error(_)        => None,
        }
    }

    pub fn to_packet(&self) -> SignalPacket {
        match self {
            SignalMessage::CallOffer(p)    => SignalPacket::new(call::CALL_OFFER, p),
            SignalMessage::CallAnswer(p)   => SignalPacket::new(call::CALL_ANSWER, p),
            SignalMessage::IceCandidate(p) => SignalPacket::new(call::ICE_CANDIDATE, p),
            SignalMessage::CallEnd(p)      => SignalPacket::new(call::CALL_END, p),
            SignalMessage::Error(p)        => SignalPacket::new(server::ERROR, p),
        }
    }

    /// 통화 이벤트가 아닌 패킷(hello, ready, heartbeat-ack)은 Ok(None)
    pub fn from_packet(packet: SignalPacket) -> CallResult<Option<Self>> {
        fn parse<T: serde::de::DeserializeOwned>(data: Option<serde_json::Value>) -> CallResult<T> {
            let v = data.ok_or_else(|| CallError::InvalidPayload("missing data".to_string()))?;
            serde_json::from_value(v).map_err(|e| CallError::InvalidPayload(e.to_string()))
        }

        let msg = match packet.event.as_str() {
            call::CALL_OFFER    => SignalMessage::CallOffer(parse(packet.data)?),
            call::CALL_ANSWER   => SignalMessage::CallAnswer(parse(packet.data)?),
            call::ICE_CANDIDATE => SignalMessage::IceCandidate(parse(packet.data)?),
            call::CALL_END      => SignalMessage::CallEnd(parse(packet.data)?),
            server::ERROR       => SignalMessage::Error(parse(packet.data)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

/// 시그널링 채널 capability
///
/// 미연결 상태의 send 는 Err(TransportUnavailable). 엔진은 이를 치명적 실패로 보지 않는다.
/// 구독 해제는 Receiver drop.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn send(&self, message: SignalMessage) -> CallResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<SignalMessage>;
}
