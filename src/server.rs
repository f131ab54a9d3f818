//! Wiring of the live-sync core into an Axum application.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::domain::Hub;
use crate::persistence::SnapshotStore;
use crate::service::{Broadcaster, ChangeListener, SnapshotBuilder};
use crate::ws::handler::ws_handler;

/// Builds the hub, snapshot builder, broadcaster, and change listener
/// over a store.
///
/// The listener is returned unstarted; the caller spawns
/// [`ChangeListener::run`] and treats its completion as fatal.
#[must_use]
pub fn assemble(store: Arc<dyn SnapshotStore>, notify_channel: &str) -> (AppState, ChangeListener) {
    let hub = Arc::new(Hub::new());
    let builder = Arc::new(SnapshotBuilder::new(store));
    let broadcaster = Broadcaster::new(Arc::clone(&hub));
    let listener = ChangeListener::new(Arc::clone(&builder), broadcaster, notify_channel);

    let state = AppState {
        hub,
        builder,
        listener_state: listener.state(),
    };
    (state, listener)
}

/// Builds the router: REST endpoints, `/ws`, tracing and CORS layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
