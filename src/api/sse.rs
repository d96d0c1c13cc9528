//! Server-sent events for a single job's event stream (§4.6, §6.1).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::SharedContext;
use crate::events::Event;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

/// Replays buffered events after `since`, then follows new ones until the
/// client disconnects. Never errors: a job with no stream yet just opens an
/// empty one.
pub async fn job_events(
    State(ctx): State<SharedContext>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (replay, rx) = ctx.events.subscribe(job_id, query.since).await;
    let live = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) });
    let combined = stream::iter(replay).chain(live).map(|event| Ok(to_sse_event(&event)));
    Sse::new(combined).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse_event(event: &Event) -> SseEvent {
    let kind = serde_json::to_value(event.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "event".to_string());
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().id(event.sequence.to_string()).event(kind).data(data)
}
