//! The engine's inbound HTTP surface (§6), one router per resource,
//! merged into a single `/api/v1`-prefixed router the way the teacher
//! nests its `/connect/*` routes under one `router()` function per module.

pub mod connections;
pub mod events;
pub mod sync_configs;
pub mod triggers;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .merge(connections::router())
            .merge(sync_configs::router())
            .merge(triggers::router())
            .merge(events::router()),
    )
}
