//! The streaming chat endpoint: one turn in, a long-lived event stream out.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};
use tracing::info;

use super::super::{ApiError, AppState};
use crate::core::orchestrator::ChatStreamRequest;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// `POST /api/chat/stream`
///
/// Validation failures surface as plain JSON errors before any event flows.
/// Once streaming, each event is framed `event: <type>` / `data: <json>`.
/// Dropping the response body (client disconnect) cancels the run through
/// the drop guard baked into the stream.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let handle = state.orchestrator.start_turn(request).await?;
    info!(session_id = %handle.session_id, "Chat stream opened");

    let guard = handle.cancel.clone().drop_guard();
    let stream = UnboundedReceiverStream::new(handle.events).map(move |event| {
        // The guard lives inside the stream: when the client goes away and
        // axum drops the body, cancellation propagates into the engine.
        let _held = &guard;
        Ok(Event::default()
            .event(event.name())
            .data(event.payload().to_string()))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
