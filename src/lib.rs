// author: kodeholic (powered by Claude)
//
// mini-webcall
//
// call      : 1:1 통화 협상 엔진 (클라이언트 측)
// signaling : 엔진 ↔ 릴레이 전송 (WS) + callId 발급 (REST)
// protocol  : 와이어 포맷 + 시그널링 릴레이 (서버 측)
// core      : 릴레이 상태 (접속자, 통화 이력)

pub mod call;
pub mod config;
pub mod core;
pub mod error;
pub mod http;
pub mod protocol;
pub mod reaper;
pub mod signaling;
pub mod trace;
pub mod utils;

use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::core::{CallRegistry, UserHub};
use crate::error::CallResult;
use crate::http::HttpState;
use crate::protocol::{ws_handler, AppState};
use crate::trace::TraceHub;

/// CLI에서 주입되는 런타임 설정
/// - 기본값은 config.rs 상수
/// - 비밀값(SECRET)은 환경변수로 별도 관리
pub struct ServerArgs {
    pub port:            u16,
    pub ring_timeout_ms: u64,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self { port: config::SIGNALING_PORT, ring_timeout_ms: config::RING_TIMEOUT_MS }
    }
}

/// 릴레이 + REST 라우터. 테스트에서 임의 포트로 띄울 때도 사용
pub fn build_app(user_hub: Arc<UserHub>, call_registry: Arc<CallRegistry>, trace_hub: Arc<TraceHub>) -> Router {
    let app_state = AppState {
        user_hub:      Arc::clone(&user_hub),
        call_registry: Arc::clone(&call_registry),
        trace_hub:     Arc::clone(&trace_hub),
    };

    let http_state = HttpState::new(user_hub, call_registry, trace_hub);

    let rest_router = Router::new()
        .route("/v1/calls",           post(http::initiate_call).get(http::list_calls))
        .route("/v1/calls/{call_id}", get(http::get_call))
        .route("/admin/status",       get(http::admin_status))
        .route("/admin/users",        get(http::admin_list_users))
        .route("/trace",              get(http::trace_stream))
        .route("/trace/{call_id}",    get(http::trace_stream))
        .with_state(http_state);

    // CORS: 브라우저 클라이언트 / Admin 대시보드 로컬 접속 허용
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        .merge(rest_router)
        .layer(cors)
}

pub async fn run_server(args: ServerArgs) -> CallResult<()> {
    let user_hub      = Arc::new(UserHub::new());
    let call_registry = Arc::new(CallRegistry::new());
    let trace_hub     = TraceHub::new();

    // 좀비 세션 / 무응답 통화 정리 태스크
    tokio::spawn(reaper::run_zombie_reaper(
        Arc::clone(&user_hub),
        Arc::clone(&call_registry),
        Arc::clone(&trace_hub),
        args.ring_timeout_ms,
    ));

    let app = build_app(user_hub, call_registry, trace_hub);

    let addr     = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("[mini-webcall] Signaling Relay on ws://{}/ws", addr);
    info!("[mini-webcall] REST API on http://{}/v1/calls", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
