// author: kodeholic (powered by Claude)
// SDP m-line 검사 모듈
//
// 엔진은 SDP를 직접 만들지 않는다 (피어 백엔드 담당).
// 여기서는 원격 offer/answer 의 미디어 섹션 구성만 읽어서
//   - callType 누락/알 수 없는 값일 때 mediaKind 추론
//   - callType 과 실제 m-line 불일치 경고
//   - answer 에 audio 섹션이 빠졌는지 확인
// 에 사용한다.

use webrtc_sdp::media_type::SdpMediaValue;

use crate::error::{CallError, CallResult};
use crate::protocol::message::MediaKind;

/// SDP 미디어 섹션 요약
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdpMediaSummary {
    /// port != 0 인 m=audio 수
    pub audio:       usize,
    /// port != 0 인 m=video 수
    pub video:       usize,
    /// m=application (data channel)
    pub application: usize,
    /// port 0 으로 거절된 섹션 수
    pub rejected:    usize,
}

impl SdpMediaSummary {
    pub fn has_audio(&self) -> bool {
        self.audio > 0
    }

    pub fn has_video(&self) -> bool {
        self.video > 0
    }

    /// video m-line 존재 여부로 통화 종류 추론
    pub fn media_kind(&self) -> MediaKind {
        if self.has_video() { MediaKind::Video } else { MediaKind::Voice }
    }
}

/// SDP 파싱 후 m-line 종류별 개수 집계
pub fn inspect(sdp: &str) -> CallResult<SdpMediaSummary> {
    let session = webrtc_sdp::parse_sdp(sdp, false)
        .map_err(|e| CallError::InvalidPayload(format!("sdp parse: {}", e)))?;

    let mut summary = SdpMediaSummary::default();
    for media in &session.media {
        if media.get_port() == 0 {
            summary.rejected += 1;
            continue;
        }
        match media.get_type() {
            SdpMediaValue::Audio       => summary.audio += 1,
            SdpMediaValue::Video       => summary.video += 1,
            _                          => summary.application += 1,
        }
    }
    Ok(summary)
}

/// offer 의 callType 과 SDP 를 합쳐 최종 mediaKind 결정
/// - callType 유효: callType 우선, SDP 와 다르면 경고
/// - callType 없음/무효: SDP 에서 추론, SDP 도 못 읽으면 Voice
pub fn resolve_media_kind(call_type: Option<&str>, sdp: &str) -> MediaKind {
    let declared = call_type.and_then(MediaKind::from_call_type);
    let inspected = match inspect(sdp) {
        Ok(summary) => Some(summary.media_kind()),
        Err(e) => {
            tracing::debug!("[sdp] inspect failed, relying on callType: {}", e);
            None
        }
    };

    match (declared, inspected) {
        (Some(d), Some(i)) if d != i => {
            tracing::warn!("[sdp] callType={} but offer m-lines say {}, keeping callType", d, i);
            d
        }
        (Some(d), _)    => d,
        (None, Some(i)) => i,
        (None, None)    => MediaKind::Voice,
    }
}
