// author: kodeholic (powered by Claude)
// Trace SSE 스트림 핸들러
//
// GET /trace                  : 전체 이벤트 스트림
// GET /trace/{call_id}        : 특정 통화만
// GET /trace?user={user_id}   : 해당 user 가 보냈거나 받은 이벤트만 (call_id 와 병용 가능)

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Sse},
};
use axum::response::sse::Event;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use super::state::HttpState;
use crate::trace::TraceEvent;

#[derive(Debug, Default, Deserialize)]
pub struct TraceQuery {
    pub user: Option<String>,
}

struct TraceFilter {
    call_id: Option<String>,
    user_id: Option<String>,
}

impl TraceFilter {
    fn admits(&self, event: &TraceEvent) -> bool {
        self.call_id.as_deref().map_or(true, |id| event.belongs_to(id))
            && self.user_id.as_deref().map_or(true, |u| event.involves(u))
    }
}

pub async fn trace_stream(
    State(state): State<HttpState>,
    call_filter: Option<Path<String>>,
    Query(query): Query<TraceQuery>,
) -> impl IntoResponse {
    let rx     = state.trace_hub.subscribe();
    let filter = TraceFilter {
        call_id: call_filter.map(|Path(id)| id),
        user_id: query.user,
    };

    let stream = BroadcastStream::new(rx)
        .filter_map(move |result| {
            let event = result.ok()?; // lagged 는 건너뜀
            if !filter.admits(&event) {
                return None;
            }
            let json = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok::<Event, std::convert::Infallible>(Event::default().data(json)))
        });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    )
}
