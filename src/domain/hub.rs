//! Registry of connected subscribers.
//!
//! [`Hub`] is the only state shared by every connection task and the
//! broadcaster. Membership lives in a `HashMap` behind a
//! [`tokio::sync::RwLock`]; register, unregister, and the member snapshot
//! taken by [`Hub::for_each`] are mutually exclusive.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::subscriber::{Subscriber, SubscriberId};
use crate::error::FleetError;

/// Set of active subscribers.
///
/// Constructed once at startup and shared as `Arc<Hub>`.
///
/// # Concurrency
///
/// - Visitors run outside the lock, so a visitor may take as long as it
///   likes without blocking connects and disconnects.
/// - A subscriber is closed in the same critical section that removes
///   it, so a pass that snapshotted it earlier cannot deliver to it
///   afterwards.
#[derive(Debug, Default)]
pub struct Hub {
    members: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Re-registering the same ID replaces the entry.
    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) {
        let id = subscriber.id();
        let count = {
            let mut members = self.members.write().await;
            members.insert(id, subscriber);
            members.len()
        };
        tracing::debug!(subscriber = %id, subscribers = count, "subscriber registered");
    }

    /// Removes and closes a subscriber.
    ///
    /// Returns `true` if the subscriber was registered.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut members = self.members.write().await;
        let Some(subscriber) = members.remove(&id) else {
            return false;
        };
        subscriber.close();
        let count = members.len();
        drop(members);
        tracing::debug!(subscriber = %id, subscribers = count, "subscriber unregistered");
        true
    }

    /// Visits every subscriber registered at the start of the pass.
    ///
    /// Subscribers for which the visitor returns an error are unregistered
    /// once the pass completes. Returns the number of successful visits.
    pub async fn for_each<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&dyn Subscriber) -> Result<(), FleetError>,
    {
        let members: Vec<Arc<dyn Subscriber>> =
            self.members.read().await.values().map(Arc::clone).collect();

        let mut failed = Vec::new();
        let mut visited = 0usize;
        for subscriber in &members {
            match visitor(subscriber.as_ref()) {
                Ok(()) => visited = visited.saturating_add(1),
                Err(err) => {
                    tracing::debug!(subscriber = %subscriber.id(), error = %err, "dropping subscriber");
                    failed.push(subscriber.id());
                }
            }
        }

        for id in failed {
            self.unregister(id).await;
        }
        visited
    }

    /// Returns the number of registered subscribers.
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Returns `true` if no subscriber is registered.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Returns `true` if the given subscriber is registered.
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.members.read().await.contains_key(&id)
    }
}
