//! Subscriber capability and its channel-backed implementation.
//!
//! The [`super::Hub`] and the broadcaster only see `Arc<dyn Subscriber>`,
//! so they do not depend on any transport. The WebSocket connection
//! handler pairs a [`ChannelSubscriber`] with its [`Outbound`] receiver.

use std::fmt;

use tokio::sync::watch;

use super::snapshot::SnapshotFrame;
use crate::error::FleetError;

/// Unique identifier for a connected subscriber.
///
/// Wraps a UUID v4 generated when the connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Creates a new random `SubscriberId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that can receive snapshot frames.
pub trait Subscriber: Send + Sync + fmt::Debug {
    /// Returns the subscriber's identity.
    fn id(&self) -> SubscriberId;

    /// Offers a frame for delivery. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::SubscriberClosed`] when the subscriber can no
    /// longer receive frames.
    fn accept(&self, frame: SnapshotFrame) -> Result<(), FleetError>;

    /// Signals the owning connection handler to terminate. After this
    /// call `accept` fails.
    fn close(&self);
}

/// Subscriber backed by `watch` channels.
///
/// The frame slot keeps only the newest frame, so a slow connection
/// skips intermediate snapshots instead of building a backlog. A frame
/// whose generation is older than the one already in the slot is
/// dropped.
#[derive(Debug)]
pub struct ChannelSubscriber {
    id: SubscriberId,
    frames: watch::Sender<Option<SnapshotFrame>>,
    closed: watch::Sender<bool>,
}

/// Receiving half of a [`ChannelSubscriber`], owned by the connection
/// handler.
#[derive(Debug)]
pub struct Outbound {
    frames: watch::Receiver<Option<SnapshotFrame>>,
    closed: watch::Receiver<bool>,
}

impl ChannelSubscriber {
    /// Creates a subscriber and its outbound receiver.
    #[must_use]
    pub fn new() -> (Self, Outbound) {
        let (frames_tx, frames_rx) = watch::channel(None);
        let (closed_tx, closed_rx) = watch::channel(false);
        let subscriber = Self {
            id: SubscriberId::new(),
            frames: frames_tx,
            closed: closed_tx,
        };
        let outbound = Outbound {
            frames: frames_rx,
            closed: closed_rx,
        };
        (subscriber, outbound)
    }

    /// Returns `true` once [`Subscriber::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn accept(&self, frame: SnapshotFrame) -> Result<(), FleetError> {
        if self.is_closed() || self.frames.is_closed() {
            return Err(FleetError::SubscriberClosed(self.id));
        }
        self.frames.send_if_modified(|slot| match slot {
            Some(current) if current.generation > frame.generation => false,
            _ => {
                *slot = Some(frame);
                true
            }
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Outbound {
    /// Waits for the next frame.
    ///
    /// Returns `None` once the subscriber is closed or dropped. Cancel
    /// safe.
    pub async fn next_frame(&mut self) -> Option<SnapshotFrame> {
        loop {
            if *self.closed.borrow() {
                return None;
            }
            tokio::select! {
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    if *self.closed.borrow() {
                        return None;
                    }
                    if let Some(frame) = self.frames.borrow_and_update().clone() {
                        return Some(frame);
                    }
                }
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
