//! Store change listener: rebuilds and broadcasts on every notification.
//!
//! The listener owns a dedicated notification subscription for the life
//! of the process. Notifications are coalesced into a single pending
//! rebuild request consumed by one worker task, so rebuilds never
//! overlap and broadcasts leave in the order they were built.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Notify, watch};

use super::broadcaster::Broadcaster;
use super::snapshot_builder::SnapshotBuilder;
use crate::error::FleetError;

/// Lifecycle of the change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// No subscription yet.
    Disconnected,
    /// Waiting for the next notification.
    Subscribed,
    /// A snapshot rebuild and broadcast is in progress.
    Rebuilding,
    /// The subscription or the rebuild worker was lost; the listener has
    /// stopped.
    Failed,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Subscribed => "subscribed",
            Self::Rebuilding => "rebuilding",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Waits on store change notifications and pushes fresh snapshots.
#[derive(Debug)]
pub struct ChangeListener {
    builder: Arc<SnapshotBuilder>,
    broadcaster: Broadcaster,
    channel: String,
    state: watch::Sender<ListenerState>,
}

impl ChangeListener {
    /// Creates a listener for the given notification channel.
    #[must_use]
    pub fn new(
        builder: Arc<SnapshotBuilder>,
        broadcaster: Broadcaster,
        channel: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Disconnected);
        Self {
            builder,
            broadcaster,
            channel: channel.into(),
            state,
        }
    }

    /// Returns a receiver tracking the listener state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Subscribes and listens until the subscription is lost.
    ///
    /// Never returns `Ok`: the only ways out are a lost subscription or a
    /// dead rebuild worker, which the caller must treat as fatal.
    ///
    /// # Errors
    ///
    /// Returns the subscription error, or [`FleetError::Internal`] if the
    /// rebuild worker dies, once the listener reaches
    /// [`ListenerState::Failed`].
    pub async fn run(self) -> Result<(), FleetError> {
        let store = Arc::clone(self.builder.store());
        let mut feed = match store.subscribe(&self.channel).await {
            Ok(feed) => feed,
            Err(err) => return Err(self.fail(err)),
        };
        self.state.send_replace(ListenerState::Subscribed);
        tracing::info!(channel = %self.channel, "listening for store changes");

        let pending = Arc::new(Notify::new());
        let mut worker = tokio::spawn(rebuild_worker(
            Arc::clone(&self.builder),
            self.broadcaster.clone(),
            Arc::clone(&pending),
            self.state.clone(),
        ));

        let err = loop {
            tokio::select! {
                change = feed.next_change() => match change {
                    Ok(notice) => {
                        tracing::debug!(channel = %notice.channel, payload = %notice.payload, "change notification");
                        // Stores at most one permit: notices arriving during a
                        // rebuild collapse into one follow-up rebuild.
                        pending.notify_one();
                    }
                    Err(err) => break err,
                },
                // Without the worker nothing rebuilds; stop instead of going stale.
                exit = &mut worker => {
                    let reason = match exit {
                        Ok(()) => "rebuild worker stopped".to_string(),
                        Err(join) => format!("rebuild worker stopped: {join}"),
                    };
                    break FleetError::Internal(reason);
                }
            }
        };

        worker.abort();
        Err(self.fail(err))
    }

    fn fail(&self, err: FleetError) -> FleetError {
        self.state.send_replace(ListenerState::Failed);
        tracing::error!(channel = %self.channel, error = %err, "change listener failed");
        err
    }
}

/// Consumes rebuild requests one at a time.
async fn rebuild_worker(
    builder: Arc<SnapshotBuilder>,
    broadcaster: Broadcaster,
    pending: Arc<Notify>,
    state: watch::Sender<ListenerState>,
) {
    loop {
        pending.notified().await;
        transition(&state, ListenerState::Subscribed, ListenerState::Rebuilding);
        refresh(&builder, &broadcaster).await;
        transition(&state, ListenerState::Rebuilding, ListenerState::Subscribed);
    }
}

/// Moves `from` to `to`; any other current state (notably `Failed`) is left
/// alone.
fn transition(state: &watch::Sender<ListenerState>, from: ListenerState, to: ListenerState) {
    state.send_if_modified(|current| {
        if *current == from {
            *current = to;
            true
        } else {
            false
        }
    });
}

/// Builds a snapshot and broadcasts it. Build failures are logged and
/// swallowed so the listener keeps running.
pub async fn refresh(builder: &SnapshotBuilder, broadcaster: &Broadcaster) {
    let snapshot = match builder.build().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::error!(error = %err, "snapshot rebuild failed; waiting for next change");
            return;
        }
    };
    if let Err(err) = broadcaster.broadcast(&snapshot).await {
        tracing::error!(generation = snapshot.generation, error = %err, "snapshot broadcast failed");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::{
        ChannelSubscriber, Device, Hub, LocationSample, NewLocation, StatusCount, Subscriber,
    };
    use crate::persistence::{ChangeFeed, ChangeNotice, MemoryStore, SnapshotStore};

    const CHANNEL: &str = "data_update";

    fn device(id: &str) -> Device {
        Device {
            device_id: id.to_string(),
            battery_level: 42,
            signal_status: "strong".to_string(),
            is_locked: false,
            status: "active".to_string(),
        }
    }

    fn new_location(id: &str) -> NewLocation {
        NewLocation {
            device_id: id.to_string(),
            latitude: 41.01,
            longitude: 28.97,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<ListenerState>, wanted: ListenerState) {
        let result = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted)).await;
        assert!(matches!(result, Ok(Ok(_))), "listener never reached {wanted}");
    }

    #[tokio::test]
    async fn notification_triggers_broadcast() {
        let store = Arc::new(MemoryStore::new(CHANNEL));
        store.upsert_device(device("A")).await;
        let hub = Arc::new(Hub::new());
        let (subscriber, mut outbound) = ChannelSubscriber::new();
        hub.register(Arc::new(subscriber) as Arc<dyn Subscriber>).await;

        let builder = Arc::new(SnapshotBuilder::new(Arc::clone(&store) as Arc<dyn SnapshotStore>));
        let listener = ChangeListener::new(builder, Broadcaster::new(Arc::clone(&hub)), CHANNEL);
        let mut state = listener.state();
        let task = tokio::spawn(listener.run());
        wait_for_state(&mut state, ListenerState::Subscribed).await;

        tokio_test::assert_ok!(store.insert_location(&new_location("A")).await);

        let frame = tokio::time::timeout(Duration::from_secs(5), outbound.next_frame()).await;
        let Ok(Some(frame)) = frame else {
            panic!("no broadcast after insert");
        };
        assert!(frame.as_str().contains("\"deviceId\":\"A\""));
        assert!(frame.as_str().contains("41.01"));

        task.abort();
    }

    /// Store whose device listing fails a fixed number of times and counts
    /// every listing attempt.
    #[derive(Debug)]
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
        listings: AtomicUsize,
        slow: AtomicBool,
        explode: AtomicBool,
        gate: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn list_devices(&self) -> Result<Vec<Device>, FleetError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.send(());
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if self.explode.load(Ordering::SeqCst) {
                panic!("device listing blew up");
            }
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(FleetError::StoreUnavailable("database restarting".to_string()));
            }
            self.inner.list_devices().await
        }

        async fn latest_location(
            &self,
            device_id: &str,
        ) -> Result<Option<LocationSample>, FleetError> {
            self.inner.latest_location(device_id).await
        }

        async fn location_history(
            &self,
            device_id: &str,
        ) -> Result<Vec<LocationSample>, FleetError> {
            self.inner.location_history(device_id).await
        }

        async fn status_counts(&self) -> Result<Vec<StatusCount>, FleetError> {
            self.inner.status_counts().await
        }

        async fn insert_location(
            &self,
            location: &NewLocation,
        ) -> Result<LocationSample, FleetError> {
            self.inner.insert_location(location).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeFeed>, FleetError> {
            self.inner.subscribe(channel).await
        }
    }

    fn flaky_store(failures: usize, slow: bool) -> (Arc<FlakyStore>, mpsc::UnboundedReceiver<()>) {
        let (gate, gate_rx) = mpsc::unbounded_channel();
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(CHANNEL),
            failures_left: AtomicUsize::new(failures),
            listings: AtomicUsize::new(0),
            slow: AtomicBool::new(slow),
            explode: AtomicBool::new(false),
            gate,
        });
        (store, gate_rx)
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_listening() {
        let (store, mut listings) = flaky_store(1, false);
        store.inner.upsert_device(device("A")).await;
        let hub = Arc::new(Hub::new());
        let (subscriber, mut outbound) = ChannelSubscriber::new();
        hub.register(Arc::new(subscriber) as Arc<dyn Subscriber>).await;

        let builder = Arc::new(SnapshotBuilder::new(Arc::clone(&store) as Arc<dyn SnapshotStore>));
        let listener = ChangeListener::new(builder, Broadcaster::new(Arc::clone(&hub)), CHANNEL);
        let mut state = listener.state();
        let task = tokio::spawn(listener.run());
        wait_for_state(&mut state, ListenerState::Subscribed).await;

        // First rebuild fails.
        store.inner.notify("A");
        let _ = listings.recv().await;
        wait_for_state(&mut state, ListenerState::Subscribed).await;
        assert!(!task.is_finished());

        // Second one succeeds and is delivered.
        store.inner.notify("A");
        let frame = tokio::time::timeout(Duration::from_secs(5), outbound.next_frame()).await;
        assert!(matches!(frame, Ok(Some(_))), "listener stopped after a failed rebuild");

        task.abort();
    }

    #[tokio::test]
    async fn notifications_during_rebuild_collapse_into_one() {
        let (store, mut listings) = flaky_store(0, true);
        store.inner.upsert_device(device("A")).await;
        let hub = Arc::new(Hub::new());

        let builder = Arc::new(SnapshotBuilder::new(Arc::clone(&store) as Arc<dyn SnapshotStore>));
        let listener = ChangeListener::new(builder, Broadcaster::new(hub), CHANNEL);
        let mut state = listener.state();
        let task = tokio::spawn(listener.run());
        wait_for_state(&mut state, ListenerState::Subscribed).await;

        store.inner.notify("A");
        // The first rebuild is now in flight.
        let _ = listings.recv().await;
        for _ in 0..5 {
            store.inner.notify("A");
        }

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(store.listings.load(Ordering::SeqCst), 2);

        task.abort();
    }

    #[tokio::test]
    async fn dead_rebuild_worker_is_fatal() {
        let (store, _listings) = flaky_store(0, false);
        store.explode.store(true, Ordering::SeqCst);
        store.inner.upsert_device(device("A")).await;

        let builder = Arc::new(SnapshotBuilder::new(Arc::clone(&store) as Arc<dyn SnapshotStore>));
        let listener = ChangeListener::new(builder, Broadcaster::new(Arc::new(Hub::new())), CHANNEL);
        let mut state = listener.state();
        let task = tokio::spawn(listener.run());
        wait_for_state(&mut state, ListenerState::Subscribed).await;

        store.inner.notify("A");

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await;
        let Ok(Ok(result)) = outcome else {
            panic!("listener kept running without its rebuild worker");
        };
        assert!(matches!(result, Err(FleetError::Internal(_))));
        assert_eq!(*state.borrow(), ListenerState::Failed);
    }

    #[derive(Debug)]
    struct DroppingFeed;

    #[async_trait]
    impl ChangeFeed for DroppingFeed {
        async fn next_change(&mut self) -> Result<ChangeNotice, FleetError> {
            Err(FleetError::SubscriptionLost("connection reset by peer".to_string()))
        }
    }

    #[derive(Debug)]
    struct DroppingStore(MemoryStore);

    #[async_trait]
    impl SnapshotStore for DroppingStore {
        async fn list_devices(&self) -> Result<Vec<Device>, FleetError> {
            self.0.list_devices().await
        }

        async fn latest_location(
            &self,
            device_id: &str,
        ) -> Result<Option<LocationSample>, FleetError> {
            self.0.latest_location(device_id).await
        }

        async fn location_history(
            &self,
            device_id: &str,
        ) -> Result<Vec<LocationSample>, FleetError> {
            self.0.location_history(device_id).await
        }

        async fn status_counts(&self) -> Result<Vec<StatusCount>, FleetError> {
            self.0.status_counts().await
        }

        async fn insert_location(
            &self,
            location: &NewLocation,
        ) -> Result<LocationSample, FleetError> {
            self.0.insert_location(location).await
        }

        async fn subscribe(&self, _channel: &str) -> Result<Box<dyn ChangeFeed>, FleetError> {
            Ok(Box::new(DroppingFeed))
        }
    }

    #[tokio::test]
    async fn lost_subscription_is_fatal() {
        let store = Arc::new(DroppingStore(MemoryStore::new(CHANNEL)));
        let builder = Arc::new(SnapshotBuilder::new(store as Arc<dyn SnapshotStore>));
        let listener = ChangeListener::new(builder, Broadcaster::new(Arc::new(Hub::new())), CHANNEL);
        let state = listener.state();

        let result = tokio::time::timeout(Duration::from_secs(5), listener.run()).await;
        let Ok(result) = result else {
            panic!("listener did not stop");
        };
        assert!(matches!(result, Err(FleetError::SubscriptionLost(_))));
        assert_eq!(*state.borrow(), ListenerState::Failed);
    }

    #[tokio::test]
    async fn subscribe_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new(CHANNEL));
        let builder = Arc::new(SnapshotBuilder::new(store as Arc<dyn SnapshotStore>));
        let listener =
            ChangeListener::new(builder, Broadcaster::new(Arc::new(Hub::new())), "unknown_channel");
        let state = listener.state();

        tokio_test::assert_err!(listener.run().await);
        assert_eq!(*state.borrow(), ListenerState::Failed);
    }
}
