// author: kodeholic (powered by Claude)
//
// HTTP 핸들러
//
// calls : 통화 생성 / 이력 조회
// admin : 서버 상태 / 접속자
// trace : 시그널링 이벤트 SSE

mod admin;
mod calls;
mod dto;
mod state;
mod trace;

pub use admin::{admin_list_users, admin_status};
pub use calls::{get_call, initiate_call, list_calls};
pub use dto::{AdminUserSummary, CallSummary, ServerStatus};
pub use state::HttpState;
pub use trace::trace_stream;
