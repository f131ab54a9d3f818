//! Fan-out of fleet snapshots to every registered subscriber.

use std::sync::Arc;

use crate::domain::{FleetSnapshot, Hub};
use crate::error::FleetError;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers that refused it and were removed.
    pub pruned: usize,
}

/// Pushes snapshots to every subscriber in the [`Hub`].
///
/// Delivery is best effort and most-recent-state-wins: there is no
/// acknowledgement, retry, or backlog.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    hub: Arc<Hub>,
}

impl Broadcaster {
    /// Creates a broadcaster over the given hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Encodes the snapshot once and offers the same frame to every
    /// subscriber. Subscribers that refuse it are unregistered and closed;
    /// the rest still receive it.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Serialization`] if the snapshot cannot be
    /// encoded. Delivery failures are never returned.
    pub async fn broadcast(&self, snapshot: &FleetSnapshot) -> Result<BroadcastReport, FleetError> {
        let frame = snapshot.encode()?;

        let mut attempted = 0usize;
        let delivered = self
            .hub
            .for_each(|subscriber| {
                attempted = attempted.saturating_add(1);
                subscriber.accept(frame.clone())
            })
            .await;

        let report = BroadcastReport {
            delivered,
            pruned: attempted.saturating_sub(delivered),
        };
        tracing::debug!(
            generation = snapshot.generation,
            devices = snapshot.len(),
            delivered = report.delivered,
            pruned = report.pruned,
            "snapshot broadcast"
        );
        Ok(report)
    }
}
