//! In-process fleet store.
//!
//! Keeps devices and location history in memory and delivers change
//! notifications over a [`tokio::sync::broadcast`] channel. Used when
//! `PERSISTENCE_ENABLED=false` and by the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::{ChangeFeed, ChangeNotice, SnapshotStore, unix_now};
use crate::domain::{Device, LocationSample, NewLocation, StatusCount};
use crate::error::FleetError;

/// Capacity of the notification channel. Receivers that fall further
/// behind see a single lagged notice, which still triggers a rebuild.
const NOTIFY_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Tables {
    devices: Vec<Device>,
    locations: HashMap<String, Vec<LocationSample>>,
}

/// Memory-backed store.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    notify_channel: String,
    notifier: broadcast::Sender<ChangeNotice>,
}

impl MemoryStore {
    /// Creates an empty store whose inserts notify on `notify_channel`.
    #[must_use]
    pub fn new(notify_channel: impl Into<String>) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            notify_channel: notify_channel.into(),
            notifier,
        }
    }

    /// Inserts or replaces a device row. Does not notify.
    pub async fn upsert_device(&self, device: Device) {
        let mut tables = self.tables.write().await;
        match tables
            .devices
            .iter_mut()
            .find(|d| d.device_id == device.device_id)
        {
            Some(existing) => *existing = device,
            None => tables.devices.push(device),
        }
    }

    /// Appends a sample with an explicit timestamp. Does not notify.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::DeviceNotFound`] for an unknown device.
    pub async fn push_location(
        &self,
        device_id: &str,
        sample: LocationSample,
    ) -> Result<(), FleetError> {
        let mut tables = self.tables.write().await;
        if !tables.devices.iter().any(|d| d.device_id == device_id) {
            return Err(FleetError::DeviceNotFound(device_id.to_string()));
        }
        tables
            .locations
            .entry(device_id.to_string())
            .or_default()
            .push(sample);
        Ok(())
    }

    /// Publishes a change notice to every open subscription.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn notify(&self, payload: &str) -> usize {
        self.notifier
            .send(ChangeNotice {
                channel: self.notify_channel.clone(),
                payload: payload.to_string(),
            })
            .unwrap_or(0)
    }
}

/// Latest sample by timestamp; ties go to the most recently appended.
fn latest_of(samples: &[LocationSample]) -> Option<LocationSample> {
    samples
        .iter()
        .copied()
        .reduce(|best, s| if s.timestamp >= best.timestamp { s } else { best })
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<Device>, FleetError> {
        Ok(self.tables.read().await.devices.clone())
    }

    async fn latest_location(
        &self,
        device_id: &str,
    ) -> Result<Option<LocationSample>, FleetError> {
        let tables = self.tables.read().await;
        Ok(tables
            .locations
            .get(device_id)
            .and_then(|samples| latest_of(samples)))
    }

    async fn location_history(&self, device_id: &str) -> Result<Vec<LocationSample>, FleetError> {
        let tables = self.tables.read().await;
        let mut samples = tables.locations.get(device_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order among equal timestamps; reverse
        // puts the newest first.
        samples.sort_by_key(|s| s.timestamp);
        samples.reverse();
        Ok(samples)
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, FleetError> {
        let tables = self.tables.read().await;
        let mut counts: Vec<StatusCount> = Vec::new();
        for device in &tables.devices {
            match counts.iter_mut().find(|c| c.status == device.status) {
                Some(entry) => entry.count = entry.count.saturating_add(1),
                None => counts.push(StatusCount {
                    status: device.status.clone(),
                    count: 1,
                }),
            }
        }
        counts.sort_by(|a, b| a.status.cmp(&b.status));
        Ok(counts)
    }

    async fn insert_location(&self, location: &NewLocation) -> Result<LocationSample, FleetError> {
        let sample = LocationSample {
            timestamp: unix_now(),
            latitude: location.latitude,
            longitude: location.longitude,
        };
        self.push_location(&location.device_id, sample).await?;
        let receivers = self.notify(&location.device_id);
        tracing::debug!(device_id = %location.device_id, receivers, "location stored");
        Ok(sample)
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeFeed>, FleetError> {
        if channel != self.notify_channel {
            return Err(FleetError::SubscriptionLost(format!(
                "unknown notification channel: {channel}"
            )));
        }
        Ok(Box::new(MemoryChangeFeed {
            receiver: self.notifier.subscribe(),
            channel: channel.to_string(),
        }))
    }
}

#[derive(Debug)]
struct MemoryChangeFeed {
    receiver: broadcast::Receiver<ChangeNotice>,
    channel: String,
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn next_change(&mut self) -> Result<ChangeNotice, FleetError> {
        match self.receiver.recv().await {
            Ok(notice) => Ok(notice),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "change feed lagged; coalescing notices");
                Ok(ChangeNotice {
                    channel: self.channel.clone(),
                    payload: String::new(),
                })
            }
            Err(broadcast::error::RecvError::Closed) => Err(FleetError::SubscriptionLost(
                format!("store dropped channel {}", self.channel),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn device(id: &str, status: &str) -> Device {
        Device {
            device_id: id.to_string(),
            battery_level: 50,
            signal_status: "weak".to_string(),
            is_locked: true,
            status: status.to_string(),
        }
    }

    fn sample(timestamp: i64) -> LocationSample {
        LocationSample {
            timestamp,
            latitude: 41.0,
            longitude: 29.0,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_device() {
        let store = MemoryStore::new("data_update");
        store.upsert_device(device("A", "idle")).await;
        store.upsert_device(device("A", "active")).await;

        let Ok(devices) = store.list_devices().await else {
            panic!("list failed");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.first().map(|d| d.status.as_str()), Some("active"));
    }

    #[tokio::test]
    async fn latest_location_picks_highest_timestamp() {
        let store = MemoryStore::new("data_update");
        store.upsert_device(device("A", "active")).await;
        for ts in [100, 300, 200] {
            tokio_test::assert_ok!(store.push_location("A", sample(ts)).await);
        }

        let Ok(latest) = store.latest_location("A").await else {
            panic!("query failed");
        };
        assert_eq!(latest.map(|s| s.timestamp), Some(300));

        let Ok(none) = store.latest_location("B").await else {
            panic!("query failed");
        };
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = MemoryStore::new("data_update");
        store.upsert_device(device("A", "active")).await;
        for ts in [100, 300, 200] {
            tokio_test::assert_ok!(store.push_location("A", sample(ts)).await);
        }

        let Ok(history) = store.location_history("A").await else {
            panic!("query failed");
        };
        let stamps: Vec<i64> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn insert_for_unknown_device_fails() {
        let store = MemoryStore::new("data_update");
        let result = store
            .insert_location(&NewLocation {
                device_id: "ghost".to_string(),
                latitude: 0.0,
                longitude: 0.0,
            })
            .await;
        assert!(matches!(result, Err(FleetError::DeviceNotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn insert_notifies_subscribers() {
        let store = MemoryStore::new("data_update");
        store.upsert_device(device("A", "active")).await;
        let Ok(mut feed) = store.subscribe("data_update").await else {
            panic!("subscribe failed");
        };

        tokio_test::assert_ok!(
            store
                .insert_location(&NewLocation {
                    device_id: "A".to_string(),
                    latitude: 1.0,
                    longitude: 2.0,
                })
                .await
        );

        let Ok(notice) = feed.next_change().await else {
            panic!("expected a notice");
        };
        assert_eq!(notice.channel, "data_update");
        assert_eq!(notice.payload, "A");
    }

    #[tokio::test]
    async fn subscribe_to_unknown_channel_fails() {
        let store = MemoryStore::new("data_update");
        tokio_test::assert_err!(store.subscribe("other").await);
    }

    #[tokio::test]
    async fn status_counts_group_devices() {
        let store = MemoryStore::new("data_update");
        store.upsert_device(device("A", "active")).await;
        store.upsert_device(device("B", "idle")).await;
        store.upsert_device(device("C", "active")).await;

        let Ok(counts) = store.status_counts().await else {
            panic!("query failed");
        };
        assert_eq!(
            counts,
            vec![
                StatusCount {
                    status: "active".to_string(),
                    count: 2
                },
                StatusCount {
                    status: "idle".to_string(),
                    count: 1
                },
            ]
        );
    }
}
