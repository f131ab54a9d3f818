//! Device handlers: device listing, fleet snapshot, location history, location ingestion.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{AddLocationRequest, AddLocationResponse, OverviewResponse};
use crate::app_state::AppState;
use crate::error::FleetError;

/// `GET /devices` — Every device row, without locations.
///
/// # Errors
///
/// Returns [`FleetError`] if the devices cannot be listed.
pub async fn all_devices(State(state): State<AppState>) -> Result<impl IntoResponse, FleetError> {
    let devices = state.builder.store().list_devices().await?;
    Ok(Json(devices))
}

/// `GET /devices/last-locations` — Every device with its latest location.
///
/// # Errors
///
/// Returns [`FleetError`] if the devices cannot be listed.
pub async fn last_locations(State(state): State<AppState>) -> Result<impl IntoResponse, FleetError> {
    let snapshot = state.builder.build().await?;
    Ok(Json(snapshot.devices))
}

/// `GET /devices/{device_id}/locations` — Location history, newest first.
///
/// # Errors
///
/// Returns [`FleetError`] on store failure.
pub async fn location_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, FleetError> {
    let history = state.builder.store().location_history(&device_id).await?;
    Ok(Json(history))
}

/// `POST /devices/locations` — Append a location sample.
///
/// The store's change notification then drives a broadcast to every
/// WebSocket client.
///
/// # Errors
///
/// Returns [`FleetError::InvalidRequest`] for bad input,
/// [`FleetError::DeviceNotFound`] for an unknown device, or a store error.
pub async fn add_location(
    State(state): State<AppState>,
    Json(req): Json<AddLocationRequest>,
) -> Result<impl IntoResponse, FleetError> {
    let location = req.validate()?;
    let sample = state.builder.store().insert_location(&location).await?;

    tracing::info!(device_id = %location.device_id, timestamp = sample.timestamp, "location added");

    let response = AddLocationResponse {
        device_id: location.device_id,
        location: sample,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /overview` — Status counts plus every device's latest location.
///
/// # Errors
///
/// Returns [`FleetError`] on store failure.
pub async fn overview(State(state): State<AppState>) -> Result<impl IntoResponse, FleetError> {
    let status = state.builder.store().status_counts().await?;
    let snapshot = state.builder.build().await?;
    Ok(Json(OverviewResponse {
        status,
        locations: snapshot.devices,
    }))
}

/// Device routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/devices", get(all_devices))
        .route("/devices/last-locations", get(last_locations))
        .route("/devices/locations", post(add_location))
        .route("/devices/{device_id}/locations", get(location_history))
        .route("/overview", get(overview))
}
