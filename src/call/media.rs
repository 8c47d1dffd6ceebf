// author: kodeholic (powered by Claude)
// Media Acquisition — 로컬 캡처 스트림 획득/해제
//
// MediaTrack 은 장치(로컬) 또는 피어 백엔드(원격)가 만든다.
// 엔진은 참조만 하고 직접 생성하지 않는다.
//
// 장치 핸들 누수 방지 규칙:
//   - acquire() 는 항상 "이전 스트림 stop → 새로 요청" 순서 (in-place 변경 없음)
//   - release() 는 진행 중인 acquire 도 무효화 (epoch 증가)
//     → 늦게 도착한 스트림은 즉시 stop 후 Cancelled

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{CallError, CallResult};
use crate::protocol::message::MediaKind;

// ----------------------------------------------------------------------------
// [MediaTrack]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

struct TrackInner {
    id:      String,
    kind:    TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// 공유 트랙 핸들: clone 은 같은 트랙을 가리킨다
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id:      id.into(),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// 장치 해제. 이후 프레임 요청 없음. 여러 번 호출해도 무해
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::Relaxed) {
            trace!("[media] track stopped id={} kind={}", self.inner.id, self.inner.kind);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Relaxed)
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other)
    }
}

// ----------------------------------------------------------------------------
// [MediaStream]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self { id: id.into(), tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn first(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks_of(kind).next()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(MediaTrack::is_stopped)
    }

    /// 종류별 첫 트랙만 남긴다. 나머지는 stop 후 버림
    pub fn keep_first_per_kind(self) -> Self {
        let mut kept: Vec<MediaTrack> = Vec::with_capacity(2);
        for track in self.tracks {
            if kept.iter().any(|k| k.kind() == track.kind()) {
                debug!("[media] duplicate {} track dropped id={}", track.kind(), track.id());
                track.stop();
            } else {
                kept.push(track);
            }
        }
        Self { id: self.id, tracks: kept }
    }
}

// ----------------------------------------------------------------------------
// [MediaDevices] 캡처 장치 capability
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_kind(kind: MediaKind) -> Self {
        Self { audio: true, video: kind.wants_video() }
    }
}

/// getUserMedia 에 해당. 권한 거부/장치 없음은 CallError::Device
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> CallResult<MediaStream>;
}

// ----------------------------------------------------------------------------
// [MediaAcquirer]
// ----------------------------------------------------------------------------

struct AcquireState {
    epoch:   u64,
    current: Option<MediaStream>,
}

pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
    state:   Mutex<AcquireState>,
}

impl MediaAcquirer {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            state: Mutex::new(AcquireState { epoch: 0, current: None }),
        }
    }

    /// 이전 스트림을 stop 한 뒤 새 스트림 요청
    pub async fn acquire(&self, kind: MediaKind) -> CallResult<MediaStream> {
        let epoch = {
            let mut st = self.state.lock().unwrap();
            st.epoch += 1;
            if let Some(prev) = st.current.take() {
                debug!("[media] stopping previous stream id={} before re-acquire", prev.id);
                prev.stop_all();
            }
            st.epoch
        };

        let constraints = MediaConstraints::for_kind(kind);
        trace!("[media] getUserMedia audio={} video={}", constraints.audio, constraints.video);

        let stream = match self.devices.get_user_media(constraints).await {
            Ok(s) => s.keep_first_per_kind(),
            Err(CallError::Device(msg)) => return Err(CallError::Device(msg)),
            Err(e) => return Err(CallError::Device(e.to_string())),
        };

        let mut st = self.state.lock().unwrap();
        if st.epoch != epoch {
            drop(st);
            debug!("[media] acquisition superseded, discarding stream id={}", stream.id);
            stream.stop_all();
            return Err(CallError::Cancelled);
        }

        if stream.first(TrackKind::Audio).is_none() {
            drop(st);
            stream.stop_all();
            return Err(CallError::Device("no audio track in captured stream".to_string()));
        }
        if constraints.video && stream.first(TrackKind::Video).is_none() {
            warn!("[media] video requested but device returned audio only (stream={})", stream.id);
        }

        st.current = Some(stream.clone());
        debug!("[media] acquired stream id={} tracks={}", stream.id, stream.tracks().len());
        Ok(stream)
    }

    /// 보유 스트림 해제 + 진행 중 acquire 무효화
    pub fn release(&self) {
        let prev = {
            let mut st = self.state.lock().unwrap();
            st.epoch += 1;
            st.current.take()
        };
        if let Some(stream) = prev {
            stream.stop_all();
            debug!("[media] released stream id={}", stream.id);
        }
    }

    pub fn current(&self) -> Option<MediaStream> {
        self.state.lock().unwrap().current.clone()
    }
}
