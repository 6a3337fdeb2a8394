use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde_json::json;
use tracing::{error, instrument};

use super::dto::{ChatRequest, ChatResponse};
use crate::state::AppState;

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

#[instrument(skip_all)]
pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Json<ChatResponse> {
    let response = state.chat.chat(&body.message, &body.history).await;
    Json(ChatResponse { response })
}

/// SSE stream of cumulative snapshots, each as `{"text": ...}`, followed by
/// a `done` event.
#[instrument(skip_all)]
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshots = state
        .chat
        .stream(&body.message, &body.history)
        .map(|snapshot| Ok(snapshot_event(&snapshot)));
    let done = stream::once(async { Ok(Event::default().event("done").data("")) });

    Sse::new(snapshots.chain(done)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// JSON keeps raw CR/LF from model text out of the event framing.
fn snapshot_event(snapshot: &str) -> Event {
    Event::default()
        .json_data(json!({ "text": snapshot }))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to encode chat snapshot");
            Event::default().event("error").data("encoding failed")
        })
}
