//! WebSocket connection lifecycle.
//!
//! Registers the connection with the hub, sends a catch-up snapshot,
//! then forwards broadcast frames until either side goes away.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use crate::domain::{ChannelSubscriber, Hub, Subscriber};
use crate::error::FleetError;
use crate::service::SnapshotBuilder;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Registers a subscriber and delivers a freshly built snapshot to it.
/// - Forwards every frame the broadcaster hands to the subscriber.
/// - Discards inbound frames; close, end of stream, or a read or write
///   error ends the connection.
///
/// The subscriber is unregistered (and thereby closed) on every exit
/// path.
pub async fn run_connection(socket: WebSocket, hub: Arc<Hub>, builder: Arc<SnapshotBuilder>) {
    let (subscriber, mut outbound) = ChannelSubscriber::new();
    let subscriber = Arc::new(subscriber);
    let id = subscriber.id();
    hub.register(Arc::clone(&subscriber) as Arc<dyn Subscriber>).await;
    tracing::info!(subscriber = %id, "ws client connected");

    if let Err(err) = send_catch_up(&builder, subscriber.as_ref()).await {
        tracing::warn!(subscriber = %id, error = %err, "catch-up snapshot failed; closing connection");
        hub.unregister(id).await;
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Frame for this client
            frame = outbound.next_frame() => {
                let Some(frame) = frame else {
                    tracing::debug!(subscriber = %id, "subscriber closed by hub");
                    break;
                };
                if ws_tx.send(Message::text(String::from(frame.as_str()))).await.is_err() {
                    tracing::debug!(subscriber = %id, "ws write failed");
                    break;
                }
            }
            // Incoming message from client, read for liveness only
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(subscriber = %id, error = %err, "ws read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unregister(id).await;
    let _ = ws_tx.close().await;
    tracing::info!(subscriber = %id, "ws client disconnected");
}

/// Builds a snapshot and offers it to a single subscriber, bypassing the
/// hub.
///
/// # Errors
///
/// Returns a [`FleetError`] if the build or encoding fails, or if the
/// subscriber is already closed.
pub async fn send_catch_up(
    builder: &SnapshotBuilder,
    subscriber: &dyn Subscriber,
) -> Result<(), FleetError> {
    let snapshot = builder.build().await?;
    let frame = snapshot.encode()?;
    subscriber.accept(frame)
}
