//! Device and location records as read from the store.

use serde::{Deserialize, Serialize};

/// A tracked device.
///
/// Rows are created and mutated by the telemetry ingestion path; this
/// service only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique, immutable device identity.
    pub device_id: String,
    /// Battery charge in percent (0–100).
    pub battery_level: i32,
    /// Signal quality label reported by the device.
    pub signal_status: String,
    /// Whether the device is currently locked.
    pub is_locked: bool,
    /// Free-form operational state.
    pub status: String,
}

/// A single GPS fix for a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// WGS84 latitude in degrees.
    pub latitude: f64,
    /// WGS84 longitude in degrees.
    pub longitude: f64,
}

/// A location sample to append for a device.
///
/// The timestamp is assigned by the store at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    /// Target device.
    pub device_id: String,
    /// WGS84 latitude in degrees.
    pub latitude: f64,
    /// WGS84 longitude in degrees.
    pub longitude: f64,
}

/// Number of devices sharing an operational status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    /// Operational status label.
    pub status: String,
    /// Number of devices in that status.
    pub count: i64,
}
