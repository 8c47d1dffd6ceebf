// author: kodeholic (powered by Claude)
// UserHub — 접속 중인 사용자 + 라우팅 테이블 (user_id → egress 큐)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::utils::current_timestamp;

/// 연결별 송신 큐 (직렬화된 SignalPacket JSON)
pub type EgressTx = mpsc::Sender<String>;

// ----------------------------------------------------------------------------
// [User] identify 시 등록, WS 종료 시 제거
// ----------------------------------------------------------------------------

pub struct User {
    pub tx:           EgressTx,
    pub session_id:   String,
    pub connected_at: u64,
    pub last_seen:    AtomicU64,   // 마지막 메시지 수신 시간 (좀비 세션 감지용)
}

impl User {
    pub fn new(tx: EgressTx, session_id: String) -> Self {
        let now = current_timestamp();
        Self {
            tx,
            session_id,
            connected_at: now,
            last_seen:    AtomicU64::new(now),
        }
    }

    pub fn touch(&self) {
        self.last_seen.store(current_timestamp(), Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------------
// [UserHub]
// ----------------------------------------------------------------------------

pub struct UserHub {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl Default for UserHub {
    fn default() -> Self {
        Self::new()
    }
}

impl UserHub {
    pub fn new() -> Self {
        trace!("Initializing UserHub");
        Self { users: RwLock::new(HashMap::new()) }
    }

    /// 같은 user_id 재접속이면 이전 연결을 덮어쓴다
    pub fn register(&self, user_id: &str, tx: EgressTx, session_id: String) -> Arc<User> {
        let user = Arc::new(User::new(tx, session_id));
        let prev = self.users.write().unwrap().insert(user_id.to_string(), Arc::clone(&user));
        if prev.is_some() {
            warn!("[user] {} re-identified, previous connection replaced", user_id);
        }
        trace!("User registered: {}", user_id);
        user
    }

    pub fn unregister(&self, user_id: &str) {
        self.users.write().unwrap().remove(user_id);
        trace!("User unregistered: {}", user_id);
    }

    /// 해당 연결이 아직 등록 주체일 때만 제거. 재접속으로 교체된 경우 유지
    pub fn unregister_if_current(&self, user_id: &str, tx: &EgressTx) -> bool {
        let mut users = self.users.write().unwrap();
        match users.get(user_id) {
            Some(u) if u.tx.same_channel(tx) => {
                users.remove(user_id);
                trace!("User unregistered: {}", user_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<User>> {
        self.users.read().unwrap().get(user_id).cloned()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.read().unwrap().contains_key(user_id)
    }

    /// 단일 대상 전송. 오프라인이거나 큐가 닫혔으면 false
    pub async fn send_to(&self, user_id: &str, packet_json: &str) -> bool {
        let Some(user) = self.get(user_id) else {
            return false;
        };
        if user.tx.send(packet_json.to_string()).await.is_err() {
            warn!("[user] send to {} failed: rx closed", user_id);
            return false;
        }
        true
    }

    /// 전체 User 목록 반환 (admin 조회용)
    pub fn all_users(&self) -> Vec<(String, Arc<User>)> {
        self.users.read().unwrap()
            .iter()
            .map(|(id, u)| (id.clone(), Arc::clone(u)))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.users.read().unwrap().len()
    }

    /// 좀비 세션 목록 반환 (last_seen 기준)
    pub fn find_zombies(&self, timeout_ms: u64) -> Vec<String> {
        let now = current_timestamp();
        self.users.read().unwrap()
            .iter()
            .filter(|(_, u)| now.saturating_sub(u.last_seen.load(Ordering::Relaxed)) >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
