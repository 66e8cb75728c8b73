//! SSE event bus, generalized from the teacher's `EventBus` /
//! `ServerEvent` (`apps/server/src/api/connect.rs`): a broadcast channel
//! every connected `GET /events` client subscribes to, fed by the
//! `SyncProgressReporter` impl below so the engine crate never has to
//! know anything about HTTP or SSE.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use sync_engine::{RunOutcome, SyncPhase, SyncProgressReporter};

pub const SYNC_START: &str = "sync-start";
pub const SYNC_PROGRESS: &str = "sync-progress";
pub const SYNC_COMPLETE: &str = "sync-complete";

#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

/// Thin wrapper around a `tokio::sync::broadcast::Sender`; cloning an
/// `EventBus` shares the same channel, matching the teacher's
/// cheaply-cloneable `EventBus` handle.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn publish(&self, event: ServerEvent) {
        // No subscribers is the common case between runs; the error is
        // silently dropped exactly as the teacher's `EventBus::publish` does.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sse_stream(bus: &EventBus) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(bus.subscribe()).filter_map(|msg| match msg {
        Ok(event) => Some(Ok(Event::default().event(event.kind).json_data(event.payload).unwrap_or_else(|_| Event::default()))),
        Err(_lagged) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `SyncProgressReporter` that publishes every phase transition to the
/// `EventBus` for SSE delivery — the server's concrete answer to the
/// engine's abstract progress hook (see `sync_engine::progress`).
pub struct EventBusProgressReporter {
    bus: EventBus,
}

impl EventBusProgressReporter {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl SyncProgressReporter for EventBusProgressReporter {
    async fn report_sync_start(&self, sync_config_id: uuid::Uuid) {
        self.bus.publish(ServerEvent {
            kind: SYNC_START,
            payload: serde_json::json!({ "syncConfigId": sync_config_id }),
        });
    }

    async fn report_progress(&self, sync_config_id: uuid::Uuid, phase: SyncPhase, detail: String) {
        self.bus.publish(ServerEvent {
            kind: SYNC_PROGRESS,
            payload: serde_json::json!({
                "syncConfigId": sync_config_id,
                "phase": phase.label(),
                "detail": detail,
            }),
        });
    }

    async fn report_sync_complete(&self, sync_config_id: uuid::Uuid, outcome: &RunOutcome) {
        self.bus.publish(ServerEvent {
            kind: SYNC_COMPLETE,
            payload: serde_json::json!({
                "syncConfigId": sync_config_id,
                "outcome": format!("{:?}", outcome.outcome),
                "added": outcome.added,
                "updated": outcome.updated,
                "deleted": outcome.deleted,
                "errorCount": outcome.errors.len(),
            }),
        });
    }
}
