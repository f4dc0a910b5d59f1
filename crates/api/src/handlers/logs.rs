//! Server-sent event stream of a job's unit output.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use spiderd_worker::logs::LogEvent;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::state::AppState;

/// Event name marking the end of a unit's output.
pub const STREAM_END_EVENT: &str = "stream_end";

/// GET /api/v1/jobs/{id}/logs
///
/// Each output chunk is one `data:` event. The stream closes after a
/// `stream_end` event once the unit's output ends. A client disconnect drops
/// the response stream, which cancels the gateway and releases the engine
/// stream.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let cancel = CancellationToken::new();
    let output = state.logs.open_job_log_stream(&id, cancel.clone()).await?;
    let guard = cancel.drop_guard();

    let events = output.map(move |event| {
        let _alive = &guard;
        Ok(sse_event(event))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(10))))
}

/// Frame one log item as an SSE event.
///
/// Carriage returns cannot travel in SSE data, so `\r\n` and lone `\r`
/// become `\n`.
pub fn sse_event(event: LogEvent) -> Event {
    match event {
        LogEvent::Output(bytes) => {
            let text = String::from_utf8_lossy(&bytes)
                .replace("\r\n", "\n")
                .replace('\r', "\n");
            Event::default().data(text)
        }
        LogEvent::End => Event::default()
            .event(STREAM_END_EVENT)
            .data("Log stream ended."),
    }
}
