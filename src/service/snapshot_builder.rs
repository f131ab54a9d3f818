//! Builds fleet snapshots from the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;

use crate::domain::{DeviceState, FleetSnapshot};
use crate::error::FleetError;
use crate::persistence::SnapshotStore;

/// Assembles the current fleet state: every device joined with its most
/// recent location.
///
/// Each build takes a new generation number before querying, so a build
/// that started later never carries a smaller generation.
#[derive(Debug)]
pub struct SnapshotBuilder {
    store: Arc<dyn SnapshotStore>,
    generation: AtomicU64,
}

impl SnapshotBuilder {
    /// Creates a builder over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Builds a snapshot with exactly one entry per device.
    ///
    /// A device with no location, or whose location lookup fails, gets
    /// `location: None`; only a failure to enumerate devices fails the
    /// build.
    ///
    /// # Errors
    ///
    /// Returns the store's error unmodified if devices cannot be listed.
    pub async fn build(&self) -> Result<FleetSnapshot, FleetError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).saturating_add(1);

        let devices = self.store.list_devices().await?;

        let lookups = devices
            .iter()
            .map(|device| self.store.latest_location(&device.device_id));
        let locations = join_all(lookups).await;

        let devices = devices
            .into_iter()
            .zip(locations)
            .map(|(device, location)| {
                let location = location.unwrap_or_else(|err| {
                    tracing::warn!(
                        device_id = %device.device_id,
                        error = %err,
                        "location lookup failed; reporting unknown location"
                    );
                    None
                });
                DeviceState { device, location }
            })
            .collect();

        Ok(FleetSnapshot {
            generation,
            devices,
        })
    }
}
