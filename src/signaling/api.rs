// author: kodeholic (powered by Claude)
// 발신 전 callId 발급 — POST /v1/calls

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CallError, CallResult};
use crate::protocol::message::{ApiResponse, CallSettings, InitiateCallData, InitiateCallRequest, MediaKind};

/// 통화 시작 capability. 성공 시 서버가 발급한 callId
#[async_trait]
pub trait CallInitiator: Send + Sync {
    async fn initiate(&self, target_user_id: &str, kind: MediaKind) -> CallResult<String>;
}

/// reqwest 기반 REST 클라이언트
pub struct HttpCallApi {
    client:   reqwest::Client,
    base_url: String,
    token:    String,
}

impl HttpCallApi {
    /// base_url 예: "http://127.0.0.1:8080"
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client:   reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token:    token.into(),
        }
    }
}

#[async_trait]
impl CallInitiator for HttpCallApi {
    async fn initiate(&self, target_user_id: &str, kind: MediaKind) -> CallResult<String> {
        let url = format!("{}/v1/calls", self.base_url);
        let body = InitiateCallRequest {
            target_user_id: target_user_id.to_string(),
            call_type:      kind,
            settings:       CallSettings::for_kind(kind),
        };

        let resp = self.client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::InitiationFailed(format!("request: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("[api] POST {} -> {}", url, status);
            return Err(CallError::InitiationFailed(format!("http {}", status.as_u16())));
        }

        let parsed: ApiResponse<InitiateCallData> = resp
            .json()
            .await
            .map_err(|e| CallError::InitiationFailed(format!("response body: {}", e)))?;

        match parsed {
            ApiResponse { success: true, data: Some(data), .. } if !data.call_id.is_empty() => {
                debug!("[api] call initiated call_id={} target={}", data.call_id, target_user_id);
                Ok(data.call_id)
            }
            ApiResponse { message, .. } => Err(CallError::InitiationFailed(
                if message.is_empty() { "server declined".to_string() } else { message },
            )),
        }
    }
}
