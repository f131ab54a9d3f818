//! Fleet snapshot and its serialized frame.
//!
//! A [`FleetSnapshot`] is the full fleet state at one point in time. It is
//! encoded once per broadcast into a [`SnapshotFrame`], whose payload is
//! shared by every subscriber.

use std::sync::Arc;

use serde::Serialize;

use super::device::{Device, LocationSample};
use crate::error::FleetError;

/// One snapshot entry: a device and its most recent location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    /// Device attributes, flattened into the entry.
    #[serde(flatten)]
    pub device: Device,
    /// Latest location, `None` when the device has no usable fix.
    pub location: Option<LocationSample>,
}

/// Full fleet state, one entry per device in store enumeration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSnapshot {
    /// Build sequence number; later builds carry larger values.
    pub generation: u64,
    /// Device entries.
    pub devices: Vec<DeviceState>,
}

impl FleetSnapshot {
    /// Number of devices in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if the fleet is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Serializes the device list into a shareable frame.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Serialization`] if JSON encoding fails.
    pub fn encode(&self) -> Result<SnapshotFrame, FleetError> {
        let json = serde_json::to_string(&self.devices)?;
        Ok(SnapshotFrame {
            generation: self.generation,
            payload: Arc::from(json),
        })
    }
}

/// An encoded snapshot ready for delivery.
///
/// Cloning is cheap: the payload is reference-counted, so every
/// subscriber receives the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFrame {
    /// Generation of the snapshot this frame was encoded from.
    pub generation: u64,
    /// JSON text of the device list.
    pub payload: Arc<str>,
}

impl SnapshotFrame {
    /// Returns the JSON payload.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.payload
    }
}
