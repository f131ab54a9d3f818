//! PostgreSQL implementation of the fleet store.
//!
//! Reads the `devices` and `device_locations` tables and delivers change
//! notifications through `LISTEN`/`NOTIFY`. The schema itself is managed
//! outside this service.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{ChangeFeed, ChangeNotice, SnapshotStore, unix_now};
use crate::config::FleetConfig;
use crate::domain::{Device, LocationSample, NewLocation, StatusCount};
use crate::error::FleetError;

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    notify_channel: String,
}

impl PostgresStore {
    /// Creates a store over an existing pool. Inserts notify on
    /// `notify_channel`.
    #[must_use]
    pub fn new(pool: PgPool, notify_channel: impl Into<String>) -> Self {
        Self {
            pool,
            notify_channel: notify_channel.into(),
        }
    }

    /// Opens a connection pool sized from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::StoreUnavailable`] if the database cannot be
    /// reached within the connect timeout.
    pub async fn connect(config: &FleetConfig) -> Result<Self, FleetError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| FleetError::StoreUnavailable(e.to_string()))?;

        Ok(Self::new(pool, config.notify_channel.clone()))
    }

}

#[async_trait]
impl SnapshotStore for PostgresStore {
    async fn list_devices(&self) -> Result<Vec<Device>, FleetError> {
        let rows = sqlx::query(
            "SELECT device_id, battery_level, signal_status, is_locked, status FROM devices",
        )
        .fetch_all(&self.pool)
        .await?;

        // A malformed row drops that device only.
        Ok(rows
            .iter()
            .filter_map(|row| match decode_device(row) {
                Ok(device) => Some(device),
                Err(err) => {
                    let device_id = row
                        .try_get::<Option<String>, _>("device_id")
                        .ok()
                        .flatten()
                        .unwrap_or_default();
                    tracing::warn!(device_id = %device_id, error = %err, "skipping malformed device row");
                    None
                }
            })
            .collect())
    }

    async fn latest_location(
        &self,
        device_id: &str,
    ) -> Result<Option<LocationSample>, FleetError> {
        let row = sqlx::query_as::<_, (i64, f64, f64)>(
            "SELECT timestamp, latitude, longitude FROM device_locations \
             WHERE device_id = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(timestamp, latitude, longitude)| LocationSample {
            timestamp,
            latitude,
            longitude,
        }))
    }

    async fn location_history(&self, device_id: &str) -> Result<Vec<LocationSample>, FleetError> {
        let rows = sqlx::query_as::<_, (i64, f64, f64)>(
            "SELECT timestamp, latitude, longitude FROM device_locations \
             WHERE device_id = $1 ORDER BY timestamp DESC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(timestamp, latitude, longitude)| LocationSample {
                timestamp,
                latitude,
                longitude,
            })
            .collect())
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, FleetError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) AS count FROM devices GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    async fn insert_location(&self, location: &NewLocation) -> Result<LocationSample, FleetError> {
        let sample = LocationSample {
            timestamp: unix_now(),
            latitude: location.latitude,
            longitude: location.longitude,
        };

        // NOTIFY inside the transaction is delivered on commit only.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO device_locations (device_id, timestamp, latitude, longitude) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&location.device_id)
        .bind(sample.timestamp)
        .bind(sample.latitude)
        .bind(sample.longitude)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &location.device_id))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.notify_channel)
            .bind(&location.device_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(device_id = %location.device_id, timestamp = sample.timestamp, "location stored");
        Ok(sample)
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeFeed>, FleetError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| FleetError::SubscriptionLost(e.to_string()))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| FleetError::SubscriptionLost(e.to_string()))?;

        Ok(Box::new(PgChangeFeed {
            listener,
            channel: channel.to_string(),
        }))
    }
}

/// Decodes one `devices` row column by column.
fn decode_device(row: &PgRow) -> Result<Device, FleetError> {
    device_from_columns(
        row.try_get("device_id")?,
        row.try_get("battery_level")?,
        row.try_get("signal_status")?,
        row.try_get("is_locked")?,
        row.try_get("status")?,
    )
}

/// Assembles a [`Device`] from nullable columns. Any `NULL` makes the row
/// unusable.
fn device_from_columns(
    device_id: Option<String>,
    battery_level: Option<i32>,
    signal_status: Option<String>,
    is_locked: Option<bool>,
    status: Option<String>,
) -> Result<Device, FleetError> {
    let Some(device_id) = device_id else {
        return Err(FleetError::RowDecode("device_id is NULL".to_string()));
    };
    let missing = |column: &str| FleetError::RowDecode(format!("{column} is NULL for {device_id}"));
    let battery_level = battery_level.ok_or_else(|| missing("battery_level"))?;
    let signal_status = signal_status.ok_or_else(|| missing("signal_status"))?;
    let is_locked = is_locked.ok_or_else(|| missing("is_locked"))?;
    let status = status.ok_or_else(|| missing("status"))?;
    Ok(Device {
        device_id,
        battery_level,
        signal_status,
        is_locked,
        status,
    })
}

/// Maps a failed insert, turning a foreign-key violation into
/// [`FleetError::DeviceNotFound`].
fn map_insert_error(err: sqlx::Error, device_id: &str) -> FleetError {
    if let sqlx::Error::Database(db) = &err
        && db.is_foreign_key_violation()
    {
        return FleetError::DeviceNotFound(device_id.to_string());
    }
    FleetError::from(err)
}

/// Change feed over a dedicated `LISTEN` connection.
struct PgChangeFeed {
    listener: PgListener,
    channel: String,
}

impl fmt::Debug for PgChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgChangeFeed")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn next_change(&mut self) -> Result<ChangeNotice, FleetError> {
        // `None` means the listening connection dropped.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(ChangeNotice {
                channel: notification.channel().to_string(),
                payload: notification.payload().to_string(),
            }),
            Ok(None) => Err(FleetError::SubscriptionLost(format!(
                "connection listening on {} closed",
                self.channel
            ))),
            Err(err) => Err(FleetError::SubscriptionLost(err.to_string())),
        }
    }
}
