// author: kodeholic (powered by Claude)
//
// wcadmin — mini-webcall 운영 관리 CLI
//
// 사용법:
//   wcadmin [--host HOST] [--port PORT] <COMMAND>
//
//   wcadmin status              서버 상태 요약 (uptime, 접속자, 열린 통화)
//   wcadmin users               접속 User 테이블
//   wcadmin calls [--limit N]   통화 이력 테이블 (최신순)
//   wcadmin calls <call_id>     통화 상세

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tabled::{Table, Tabled};

// ----------------------------------------------------------------------------
// [CLI 정의]
// ----------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name    = "wcadmin",
    about   = "mini-webcall 운영 관리 CLI",
    version,
)]
struct Cli {
    /// 서버 호스트
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 서버 포트 (WS/HTTP 공용)
    #[arg(long, default_value_t = 8080)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 서버 상태 요약
    Status,

    /// 접속 User 목록
    Users,

    /// 통화 이력 또는 상세
    Calls {
        /// call_id 지정 시 상세 보기
        call_id: Option<String>,

        /// 목록 최대 건수
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

// ----------------------------------------------------------------------------
// [응답 타입]: http/dto.rs 와 대응
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct ServerStatus {
    uptime_secs: u64,
    user_count:  usize,
    call_count:  usize,
    open_calls:  usize,
}

#[derive(Deserialize, Tabled)]
struct AdminUserSummary {
    #[tabled(rename = "USER ID")]
    user_id:      String,
    #[tabled(rename = "SESSION")]
    session_id:   String,
    #[tabled(skip)]
    #[allow(dead_code)]
    connected_at: u64,
    #[tabled(skip)]
    #[allow(dead_code)]
    last_seen_ms: u64,
    #[tabled(rename = "IDLE(s)")]
    idle_secs:    u64,
    #[tabled(rename = "CALLS")]
    open_calls:   usize,
}

#[derive(Deserialize)]
struct CallSummary {
    call_id:     String,
    caller_id:   Option<String>,
    callee_id:   String,
    call_type:   String,
    status:      String,
    created_at:  u64,
    duration_ms: Option<u64>,
}

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "CALL ID")]
    call_id:  String,
    #[tabled(rename = "CALLER")]
    caller:   String,
    #[tabled(rename = "CALLEE")]
    callee:   String,
    #[tabled(rename = "TYPE")]
    kind:     String,
    #[tabled(rename = "STATUS")]
    status:   String,
    #[tabled(rename = "CREATED")]
    created:  String,
    #[tabled(rename = "DURATION")]
    duration: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallDetail {
    call_id:     String,
    caller_id:   Option<String>,
    callee_id:   String,
    call_type:   String,
    status:      String,
    created_at:  u64,
    ringing_at:  Option<u64>,
    answered_at: Option<u64>,
    ended_at:    Option<u64>,
    ended_by:    Option<String>,
}

// ----------------------------------------------------------------------------
// [main]
// ----------------------------------------------------------------------------

fn main() {
    let cli  = Cli::parse();
    let base = format!("http://{}:{}", cli.host, cli.port);

    let result = match &cli.command {
        Command::Status                              => cmd_status(&base),
        Command::Users                               => cmd_users(&base),
        Command::Calls { call_id: None, limit }      => cmd_calls(&base, *limit),
        Command::Calls { call_id: Some(id), .. }     => cmd_call_detail(&base, id),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "ERROR:".red().bold(), e);
        std::process::exit(1);
    }
}

// ----------------------------------------------------------------------------
// [커맨드 구현]
// ----------------------------------------------------------------------------

fn cmd_status(base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let s: ServerStatus = get_json(&format!("{}/admin/status", base))?;

    let hours   = s.uptime_secs / 3600;
    let minutes = (s.uptime_secs % 3600) / 60;
    let secs    = s.uptime_secs % 60;

    println!();
    println!("{}", "  mini-webcall Relay Status".bold().cyan());
    println!("  {}", "─".repeat(36).dimmed());
    println!("  {:16} {}",
        "Uptime:".bold(),
        format!("{}h {}m {}s", hours, minutes, secs).green()
    );
    println!("  {:16} {}", "Users:".bold(), s.user_count.to_string().yellow());
    println!("  {:16} {}", "Calls:".bold(), s.call_count.to_string().yellow());
    println!("  {:16} {}",
        "Open Calls:".bold(),
        if s.open_calls > 0 {
            s.open_calls.to_string().green().bold().to_string()
        } else {
            s.open_calls.to_string().dimmed().to_string()
        }
    );
    println!();
    Ok(())
}

fn cmd_users(base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut users: Vec<AdminUserSummary> = get_json(&format!("{}/admin/users", base))?;

    if users.is_empty() {
        println!("{}", "  접속 중인 User 없음".dimmed());
        return Ok(());
    }

    // heartbeat 지연 user 강조
    for u in &mut users {
        if u.idle_secs > 60 {
            u.user_id = u.user_id.red().to_string();
        }
    }

    println!();
    println!("{}", Table::new(&users));
    println!("  {} user(s)", users.len());
    println!();
    Ok(())
}

fn cmd_calls(base: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let calls: Vec<CallSummary> = get_json(&format!("{}/v1/calls?limit={}", base, limit))?;

    if calls.is_empty() {
        println!("{}", "  통화 이력 없음".dimmed());
        return Ok(());
    }

    let rows: Vec<CallRow> = calls.iter().map(|c| CallRow {
        call_id:  c.call_id.clone(),
        caller:   c.caller_id.clone().unwrap_or_else(|| "-".to_string()),
        callee:   c.callee_id.clone(),
        kind:     c.call_type.clone(),
        status:   colorize_status(&c.status),
        created:  format_ts(c.created_at),
        duration: c.duration_ms
            .map(|ms| format!("{}s", ms / 1000))
            .unwrap_or_else(|| "-".to_string()),
    }).collect();

    println!();
    println!("{}", Table::new(&rows));
    println!("  {} call(s)", rows.len());
    println!();
    Ok(())
}

fn cmd_call_detail(base: &str, call_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let c: CallDetail = get_json(&format!("{}/v1/calls/{}", base, call_id))?;

    println!();
    println!("{}", format!("  Call: {}", c.call_id).bold().cyan());
    println!("  {}", "─".repeat(36).dimmed());
    println!("  {:16} {}", "Caller:".bold(),   c.caller_id.as_deref().unwrap_or("(offer 전)"));
    println!("  {:16} {}", "Callee:".bold(),   c.callee_id);
    println!("  {:16} {}", "Type:".bold(),     c.call_type);
    println!("  {:16} {}", "Status:".bold(),   colorize_status(&c.status));
    println!("  {:16} {}", "Created:".bold(),  format_ts(c.created_at));
    println!("  {:16} {}", "Ringing:".bold(),  format_opt_ts(c.ringing_at));
    println!("  {:16} {}", "Answered:".bold(), format_opt_ts(c.answered_at));
    println!("  {:16} {}", "Ended:".bold(),    format_opt_ts(c.ended_at));
    println!("  {:16} {}", "Ended By:".bold(), c.ended_by.as_deref().unwrap_or("-"));
    println!();
    Ok(())
}

// ----------------------------------------------------------------------------
// [공통 유틸]
// ----------------------------------------------------------------------------

fn colorize_status(status: &str) -> String {
    match status {
        "active"   => status.green().bold().to_string(),
        "ringing"  => status.yellow().to_string(),
        "missed" | "rejected" => status.red().to_string(),
        _ => status.dimmed().to_string(),
    }
}

/// GET 요청 + JSON 역직렬화
fn get_json<T: for<'de> serde::Deserialize<'de>>(url: &str) -> Result<T, Box<dyn std::error::Error>> {
    let resp = reqwest::blocking::get(url)?;
    let status = resp.status();
    if !status.is_success() {
        let body: serde_json::Value = resp.json().unwrap_or_default();
        let msg = body["error"].as_str().unwrap_or("unknown error");
        return Err(format!("[{}] {}", status, msg).into());
    }
    Ok(resp.json()?)
}

/// Unix millis → 로컬 "YYYY-MM-DD HH:MM:SS"
fn format_ts(ms: u64) -> String {
    if ms == 0 {
        return "-".to_string();
    }
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None    => "-".to_string(),
    }
}

fn format_opt_ts(ms: Option<u64>) -> String {
    ms.map(format_ts).unwrap_or_else(|| "-".to_string())
}
