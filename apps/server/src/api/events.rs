//! `GET /events` — the SSE endpoint a UI subscribes to for live
//! per-phase sync progress, wired to the same `EventBus` the
//! `EventBusProgressReporter` publishes into (see `crate::events`).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;

use crate::state::AppState;

async fn stream_events(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    crate::events::sse_stream(&state.events)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(stream_events))
}
