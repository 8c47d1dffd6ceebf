// author: kodeholic (powered by Claude)
// 릴레이 상태 — 네트워크 로직과 분리된 순수 상태 관리

pub mod call_registry;
pub mod user;

pub use call_registry::{CallRecord, CallRegistry, CallStatus};
pub use user::{EgressTx, User, UserHub};
