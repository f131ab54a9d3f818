//! Persistence layer: the fleet store and its change notifications.
//!
//! [`SnapshotStore`] is the seam between the live-sync core and the
//! relational store that holds device rows and location history.
//! [`postgres::PostgresStore`] talks to PostgreSQL through `sqlx`;
//! [`memory::MemoryStore`] keeps everything in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{Device, LocationSample, NewLocation, StatusCount};
use crate::error::FleetError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// A change notification received from the store.
///
/// The payload is informational only; arrival alone means "rebuild".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Channel the notification arrived on.
    pub channel: String,
    /// Free-form payload (the device ID for inserts made by this service).
    pub payload: String,
}

/// Query and mutation interface over devices and their locations.
#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Returns every device in store order.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::StoreUnavailable`] if the devices cannot be
    /// enumerated.
    async fn list_devices(&self) -> Result<Vec<Device>, FleetError>;

    /// Returns the most recent location for a device, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`FleetError`] if the query or row decoding fails.
    async fn latest_location(&self, device_id: &str)
    -> Result<Option<LocationSample>, FleetError>;

    /// Returns every location for a device, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`FleetError`] if the query or row decoding fails.
    async fn location_history(&self, device_id: &str) -> Result<Vec<LocationSample>, FleetError>;

    /// Returns device counts grouped by operational status.
    ///
    /// # Errors
    ///
    /// Returns a [`FleetError`] if the query fails.
    async fn status_counts(&self) -> Result<Vec<StatusCount>, FleetError>;

    /// Appends a location sample stamped with the current time and
    /// notifies change subscribers once it is committed.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::DeviceNotFound`] for an unknown device, or
    /// [`FleetError::StoreUnavailable`] on store failure.
    async fn insert_location(&self, location: &NewLocation) -> Result<LocationSample, FleetError>;

    /// Opens a dedicated subscription to the given notification channel.
    ///
    /// # Errors
    ///
    /// Returns a [`FleetError`] if the subscription cannot be established.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeFeed>, FleetError>;
}

/// A live subscription to store change notifications.
#[async_trait]
pub trait ChangeFeed: Send + std::fmt::Debug {
    /// Waits until the next notification arrives.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::SubscriptionLost`] when the subscription can
    /// no longer deliver notifications.
    async fn next_change(&mut self) -> Result<ChangeNotice, FleetError>;
}

/// Current Unix time in whole seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
