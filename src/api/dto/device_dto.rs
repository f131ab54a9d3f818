//! Device and location DTOs.

use serde::{Deserialize, Serialize};

use crate::domain::{DeviceState, LocationSample, NewLocation, StatusCount};
use crate::error::FleetError;

/// Request body for `POST /api/v1/devices/locations`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddLocationRequest {
    /// Target device.
    pub device_id: String,
    /// WGS84 latitude in degrees, within [-90, 90].
    pub latitude: f64,
    /// WGS84 longitude in degrees, within [-180, 180].
    pub longitude: f64,
}

impl AddLocationRequest {
    /// Validates the request and converts it into a [`NewLocation`].
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidRequest`] for an empty device ID or
    /// out-of-range coordinates.
    pub fn validate(self) -> Result<NewLocation, FleetError> {
        let device_id = self.device_id.trim();
        if device_id.is_empty() {
            return Err(FleetError::InvalidRequest(
                "device_id must not be empty".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(FleetError::InvalidRequest(format!(
                "latitude {} out of range [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(FleetError::InvalidRequest(format!(
                "longitude {} out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(NewLocation {
            device_id: device_id.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

/// Response body for a stored location sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLocationResponse {
    /// Device the sample was stored for.
    pub device_id: String,
    /// The stored sample, including its assigned timestamp.
    pub location: LocationSample,
}

/// Response body for `GET /api/v1/overview`.
#[derive(Debug, Clone, Serialize)]
pub struct OverviewResponse {
    /// Device counts grouped by status.
    pub status: Vec<StatusCount>,
    /// Every device with its latest location.
    pub locations: Vec<DeviceState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(device_id: &str, latitude: f64, longitude: f64) -> AddLocationRequest {
        AddLocationRequest {
            device_id: device_id.to_string(),
            latitude,
            longitude,
        }
    }

    #[test]
    fn accepts_valid_coordinates() {
        let result = request(" A ", 41.0, 29.0).validate();
        assert!(matches!(result, Ok(ref loc) if loc.device_id == "A"));
    }

    #[test]
    fn accepts_boundaries() {
        assert!(request("A", -90.0, 180.0).validate().is_ok());
        assert!(request("A", 90.0, -180.0).validate().is_ok());
    }

    #[test]
    fn rejects_empty_device_id() {
        let result = request("  ", 0.0, 0.0).validate();
        assert!(matches!(result, Err(FleetError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(request("A", 90.5, 0.0).validate().is_err());
        assert!(request("A", 0.0, -180.5).validate().is_err());
        assert!(request("A", f64::NAN, 0.0).validate().is_err());
    }
}
