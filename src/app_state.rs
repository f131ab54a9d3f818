//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::Hub;
use crate::service::{ListenerState, SnapshotBuilder};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of connected WebSocket subscribers.
    pub hub: Arc<Hub>,
    /// Snapshot builder, also the handle to the store.
    pub builder: Arc<SnapshotBuilder>,
    /// Current change listener state, reported by `/health`.
    pub listener_state: watch::Receiver<ListenerState>,
}
