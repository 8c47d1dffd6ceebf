// author: kodeholic (powered by Claude)
//
// wctrace — mini-webcall 실시간 시그널링 관찰 CLI
//
// 사용법:
//   wctrace [--host HOST] [--port PORT] [--filter EVENT] [--user USER_ID] [CALL_ID]
//
// 예시:
//   wctrace                          # 전체 이벤트 스트림
//   wctrace call_abc                 # call_abc 통화만
//   wctrace --filter ice             # ice-candidate 만 (전체 통화)
//   wctrace --user alice             # alice 관련 이벤트만
//
// 통화별로 offer → answer 응답 시간, answer → end 통화 시간을 같이 표시한다.

use chrono::{Local, TimeZone};
use clap::Parser;
use colored::Colorize;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader};

#[derive(Parser)]
#[command(
    name    = "wctrace",
    about   = "mini-webcall 실시간 시그널링 이벤트 스트림 관찰",
    version,
)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// 이벤트 이름 필터 (대소문자 무관, 부분 일치)
    #[arg(long, short = 'f')]
    filter: Option<String>,

    /// 해당 user 가 보냈거나 받은 이벤트만
    #[arg(long, short = 'u')]
    user: Option<String>,

    /// 관찰할 call_id (생략 시 전체)
    call_id: Option<String>,
}

/// 서버 TraceEvent JSON
#[derive(Debug, Deserialize)]
struct TraceEvent {
    ts:      u64,
    dir:     String,
    call_id: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    peer_id: Option<String>,
    event:   String,
    summary: String,
}

// ----------------------------------------------------------------------------
// [CallTimeline] 통화별 시각 추적
// ----------------------------------------------------------------------------

#[derive(Default)]
struct CallMarks {
    offered_at:  Option<u64>,
    answered_at: Option<u64>,
}

#[derive(Default)]
struct CallTimeline {
    calls:  HashMap<String, CallMarks>,
    counts: BTreeMap<String, u64>,
}

impl CallTimeline {
    /// 이벤트 반영 후 표시할 경과 시간 문구 반환
    /// 같은 이벤트가 in/out 양쪽으로 찍히므로 첫 관측만 기록
    fn observe(&mut self, e: &TraceEvent) -> Option<String> {
        *self.counts.entry(e.event.clone()).or_default() += 1;

        let call_id = e.call_id.as_deref()?;
        match e.event.as_str() {
            "call-offer" => {
                self.calls.entry(call_id.to_string()).or_default().offered_at.get_or_insert(e.ts);
                None
            }
            "call-answer" => {
                let marks = self.calls.entry(call_id.to_string()).or_default();
                if marks.answered_at.is_some() {
                    return None;
                }
                marks.answered_at = Some(e.ts);
                marks.offered_at.map(|t| format!("ring {}", elapsed(t, e.ts)))
            }
            "call-end" => {
                let marks = self.calls.remove(call_id)?;
                match (marks.offered_at, marks.answered_at) {
                    (_, Some(answered)) => Some(format!("talk {}", elapsed(answered, e.ts))),
                    (Some(offered), None) => Some(format!("unanswered after {}", elapsed(offered, e.ts))),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn open_calls(&self) -> usize {
        self.calls.len()
    }
}

fn elapsed(from: u64, to: u64) -> String {
    let ms = to.saturating_sub(from);
    if ms < 1000 { format!("{}ms", ms) } else { format!("{:.1}s", ms as f64 / 1000.0) }
}

// ----------------------------------------------------------------------------
// [메인]
// ----------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    let mut url = match &cli.call_id {
        Some(id) => format!("http://{}:{}/trace/{}", cli.host, cli.port, id),
        None     => format!("http://{}:{}/trace",   cli.host, cli.port),
    };
    // user 필터는 서버에서 (보낸 쪽 / 상대 모두 매칭)
    if let Some(user) = &cli.user {
        url.push_str(&format!("?user={}", user));
    }
    let filter = cli.filter.as_ref().map(|s| s.to_lowercase());

    print_header(&url, filter.as_deref(), cli.user.as_deref());

    // SSE 스트림이라 타임아웃 없음
    let client = match Client::builder().timeout(None).build() {
        Ok(c)  => c,
        Err(e) => fatal(&format!("reqwest client 생성 실패: {}", e)),
    };
    let resp = match client.get(&url).header("Accept", "text/event-stream").send() {
        Ok(r) if r.status().is_success() => r,
        Ok(r)  => fatal(&format!("HTTP {}", r.status())),
        Err(e) => fatal(&format!("서버 연결 실패: {} ({})", e, url)),
    };

    let mut timeline = CallTimeline::default();
    let mut shown: u64 = 0;

    for line in BufReader::new(resp).lines() {
        let line = match line {
            Ok(l)  => l,
            Err(e) => {
                eprintln!("{} 스트림 읽기 실패: {}", "✗".red(), e);
                break;
            }
        };
        // keep-alive 주석 / 빈 줄 skip
        let Some(json) = line.strip_prefix("data: ") else { continue };

        let event: TraceEvent = match serde_json::from_str(json) {
            Ok(e)  => e,
            Err(e) => {
                eprintln!("{} JSON 파싱 실패: {} ({})", "⚠".yellow(), e, json);
                continue;
            }
        };

        // 필터에 걸려도 타이밍은 계속 추적
        let timing = timeline.observe(&event);

        if filter.as_deref().is_some_and(|f| !event.event.to_lowercase().contains(f)) {
            continue;
        }

        print_event(&event, timing.as_deref());
        shown += 1;
    }

    println!("{}", "─".repeat(100).dimmed());
    println!("  스트림 종료: 표시 {} 건, 미종료 통화 {} 건", shown, timeline.open_calls());
    for (event, n) in &timeline.counts {
        println!("    {:<16} {}", event, n);
    }
}

fn fatal(msg: &str) -> ! {
    eprintln!("{} {}", "✗".red(), msg);
    std::process::exit(1);
}

// ----------------------------------------------------------------------------
// [출력]
// ----------------------------------------------------------------------------

fn print_header(url: &str, filter: Option<&str>, user: Option<&str>) {
    let mut tags = Vec::new();
    if let Some(f) = filter {
        tags.push(format!("[filter: {}]", f));
    }
    if let Some(u) = user {
        tags.push(format!("[user: {}]", u));
    }

    println!("{}", "─".repeat(100).dimmed());
    println!("  {} {}  {}  {}", "wctrace".bold().cyan(), "▶".green(), url.dimmed(), tags.join(" ").yellow());
    println!("{}", "─".repeat(100).dimmed());
    println!(
        "  {:<12} {:<6} {:<16} {:<14} {:<26} {}",
        "TIME".dimmed(), "DIR".dimmed(), "EVENT".dimmed(), "USER".dimmed(), "CALL".dimmed(), "SUMMARY".dimmed(),
    );
    println!("{}", "─".repeat(100).dimmed());
}

fn print_event(e: &TraceEvent, timing: Option<&str>) {
    let dir = match e.dir.as_str() {
        "in"  => "↓ C→R".bright_blue().to_string(),
        "out" => "↑ R→C".bright_green().to_string(),
        "sys" => "· SYS".bright_yellow().to_string(),
        other => other.dimmed().to_string(),
    };
    let timing = timing.map(|t| format!(" ({})", t).bright_magenta().to_string()).unwrap_or_default();

    println!(
        "  {} {} {} {} {:<26} {}{}",
        format_ts(e.ts).dimmed(),
        dir,
        colorize_event(&e.event),
        fit(&party(e), 14).bright_white(),
        e.call_id.as_deref().unwrap_or("-").dimmed(),
        e.summary.dimmed(),
        timing,
    );
}

/// 컬러 코드가 폭 계산을 망치지 않도록 패딩 후 색칠
fn colorize_event(name: &str) -> String {
    let padded = format!("{:<16}", name);
    match name {
        "call-offer"    => padded.bright_cyan().bold().to_string(),
        "call-answer"   => padded.bright_green().bold().to_string(),
        "call-end"      => padded.bright_red().to_string(),
        "ice-candidate" => padded.dimmed().to_string(),
        "identify" | "initiate" => padded.bright_magenta().to_string(),
        _               => padded,
    }
}

/// Unix millis → 로컬 "HH:MM:SS.mmm"
fn format_ts(ts_ms: u64) -> String {
    match Local.timestamp_millis_opt(ts_ms as i64).single() {
        Some(t) => t.format("%H:%M:%S%.3f").to_string(),
        None    => "-".to_string(),
    }
}

/// out 이벤트는 "보낸쪽>받는쪽" 으로 표시
fn party(e: &TraceEvent) -> String {
    let user = e.user_id.as_deref().unwrap_or("-");
    match &e.peer_id {
        Some(peer) => format!("{}>{}", peer, user),
        None       => user.to_string(),
    }
}

fn fit(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return format!("{:<width$}", s, width = width);
    }
    let head: String = s.chars().take(width - 1).collect();
    format!("{}…", head)
}
