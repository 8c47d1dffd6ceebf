// author: kodeholic (powered by Claude)

use clap::Parser;
use mini_webcall::{config, run_server, ServerArgs};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// mini-webcall 시그널링 릴레이
#[derive(Parser)]
#[command(name = "wcserver", version)]
struct Cli {
    /// WS/HTTP 포트
    #[arg(long, default_value_t = config::SIGNALING_PORT)]
    port: u16,

    /// 무응답 통화 missed 처리 시간 (ms)
    #[arg(long, default_value_t = config::RING_TIMEOUT_MS)]
    ring_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // 환경 변수 기반 로깅 초기화 (기본값: info)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let args = ServerArgs { port: cli.port, ring_timeout_ms: cli.ring_timeout_ms };

    if let Err(e) = run_server(args).await {
        error!("[mini-webcall] server stopped: {}", e);
        std::process::exit(1);
    }
}
