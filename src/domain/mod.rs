//! Domain layer: fleet records, snapshots, subscribers, and the hub.
//!
//! This module contains the server-side domain model: device and
//! location records, the fleet snapshot with its encoded frame, the
//! transport-agnostic subscriber capability, and the registry of
//! connected subscribers.

pub mod device;
pub mod hub;
pub mod snapshot;
pub mod subscriber;

pub use device::{Device, LocationSample, NewLocation, StatusCount};
pub use hub::Hub;
pub use snapshot::{DeviceState, FleetSnapshot, SnapshotFrame};
pub use subscriber::{ChannelSubscriber, Outbound, Subscriber, SubscriberId};
